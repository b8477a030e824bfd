//! Advisor flow - guarded-transition dialog engine
//!
//! A conversation is a walk over a graph of named states. Each turn feeds
//! one input through guarded edges and per-state hooks until the flow
//! waits for the human, waits for a collaborator, or ends.

pub mod config;
pub mod db;
pub mod flows;
pub mod runtime;
pub mod state_machine;

pub use state_machine::{
    Flow, GraphBuilder, Guard, OutboundMessage, Session, Snapshot, StateId, TurnReport, TurnSignal,
};
