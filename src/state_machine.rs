//! Core dialog state engine
//!
//! An immutable guarded-transition graph, a per-conversation session, hooks
//! that run on entering and leaving states, and the turn loop that ties them
//! together. Nothing here performs I/O; collaborators are reached only from
//! hooks and through the [`OutputSink`].

pub mod graph;
pub mod hooks;
pub mod resolver;
pub mod run_loop;
pub mod session;

#[cfg(test)]
mod proptests;

pub use graph::{Edge, GraphBuilder, GraphError, Guard, StateGraph};
pub use hooks::{
    Attachment, Destination, EnterContext, ExitContext, FormSpec, HookRegistry, MessageKind,
    OptionItem, OutboundMessage, OutputSink,
};
pub use resolver::{resolve, ResolveError, TurnContext};
pub use run_loop::{EngineError, Flow, FlowBuilder, TurnReport, DEFAULT_MAX_HOPS};
pub use session::{FlowError, Session, Snapshot, StateId, TurnSignal, Variables};
