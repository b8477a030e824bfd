//! Turn-scoped run loop
//!
//! A turn starts when new input arrives and runs resolve → exit hook →
//! enter hook repeatedly until a hook suspends or the terminal state is
//! entered. Hooks never yield mid-turn.

use super::graph::{GraphBuilder, GraphError, StateGraph};
use super::hooks::{EnterContext, ExitContext, HookRegistry, OutputSink};
use super::resolver::{resolve, ResolveError, TurnContext};
use super::session::{FlowError, Session, StateId, TurnSignal};
use std::sync::Arc;
use thiserror::Error;

/// Hop limit for one turn unless configured otherwise
pub const DEFAULT_MAX_HOPS: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("hook for `{state}` failed: {source}")]
    Precondition {
        state: StateId,
        #[source]
        source: FlowError,
    },
    #[error("hook for `{state}` returned {signal}, expected continue/await_input/await_callback")]
    InvalidSignal { state: StateId, signal: TurnSignal },
    #[error("turn exceeded {hops} hops without suspending (last state `{state}`)")]
    RunawayTurn { state: StateId, hops: usize },
    #[error("conversation already ended at `{0}`")]
    SessionEnded(StateId),
}

impl EngineError {
    /// Whether this is a graph-authoring defect rather than a bad session
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Resolve(ResolveError::NoMatchingEdge { .. })
                | Self::InvalidSignal { .. }
                | Self::RunawayTurn { .. }
        )
    }
}

/// What one call to [`Flow::process_turn`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    /// States entered, in order
    pub visited: Vec<StateId>,
    pub signal: TurnSignal,
    pub ended: bool,
}

/// A graph plus its hooks: one complete conversational flow.
///
/// Built once and shared (behind an `Arc`) by every session of the flow.
#[derive(Debug)]
pub struct Flow {
    name: String,
    graph: StateGraph,
    hooks: HookRegistry,
    max_hops: usize,
}

impl Flow {
    pub fn builder(name: impl Into<String>, graph: GraphBuilder) -> FlowBuilder {
        FlowBuilder {
            name: name.into(),
            graph,
            hooks: HookRegistry::new(),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.graph.initial().clone())
    }

    /// Drive one turn of `session` with `input`, mutating it in place.
    ///
    /// On success the session is either at the terminal state or suspended
    /// with `AwaitInput` / `AwaitCallback`; it never returns mid-`Continue`.
    /// On error the state, variables and signal are rolled back to what they
    /// were before the call and the input is cleared. Messages already
    /// emitted to `sink` are not retracted.
    pub fn process_turn(
        &self,
        session: &mut Session,
        input: Option<String>,
        sink: &mut dyn OutputSink,
    ) -> Result<TurnReport, EngineError> {
        if self.graph.is_terminal(&session.state) {
            return Err(EngineError::SessionEnded(session.state.clone()));
        }

        let checkpoint = session.save();
        let signal = session.signal;
        session.input = input;

        let result = self.run_hops(session, sink);
        if result.is_err() {
            session.state = checkpoint.state;
            session.variables = checkpoint.variables;
            session.signal = signal;
            session.input = None;
        }
        result
    }

    fn run_hops(&self, session: &mut Session, sink: &mut dyn OutputSink) -> Result<TurnReport, EngineError> {
        let mut visited = Vec::new();

        loop {
            if visited.len() >= self.max_hops {
                tracing::error!(
                    flow = %self.name,
                    state = %session.state,
                    hops = visited.len(),
                    "Turn did not reach a suspend point"
                );
                return Err(EngineError::RunawayTurn {
                    state: session.state.clone(),
                    hops: visited.len(),
                });
            }

            let dest = {
                let ctx = TurnContext::new(session.input.as_deref(), &session.variables);
                resolve(&self.graph, &session.state, &ctx)?.dest.clone()
            };

            if let Some(on_exit) = self.hooks.exit_hook(&session.state) {
                let mut ctx = ExitContext::new(
                    &session.state,
                    session.input.as_deref(),
                    &mut session.variables,
                    sink,
                );
                on_exit(&mut ctx).map_err(|source| EngineError::Precondition {
                    state: session.state.clone(),
                    source,
                })?;
            }

            tracing::debug!(flow = %self.name, from = %session.state, to = %dest, "Entering state");
            session.state = dest;
            visited.push(session.state.clone());

            let signal = self.enter(session, sink)?;
            session.signal = signal;

            if self.graph.is_terminal(&session.state) {
                tracing::info!(flow = %self.name, hops = visited.len(), "Conversation reached terminal state");
                return Ok(TurnReport {
                    visited,
                    signal,
                    ended: true,
                });
            }

            if signal.is_suspend() {
                tracing::debug!(
                    flow = %self.name,
                    state = %session.state,
                    signal = %signal,
                    hops = visited.len(),
                    "Turn suspended"
                );
                return Ok(TurnReport {
                    visited,
                    signal,
                    ended: false,
                });
            }
        }
    }

    fn enter(&self, session: &mut Session, sink: &mut dyn OutputSink) -> Result<TurnSignal, EngineError> {
        // Presence of an enter hook for every entered state is checked at build time
        let Some(on_enter) = self.hooks.enter_hook(&session.state) else {
            return Err(EngineError::Precondition {
                state: session.state.clone(),
                source: FlowError::hook("no enter hook registered"),
            });
        };

        session.signal = TurnSignal::Busy;
        let mut ctx = EnterContext::new(
            &session.state,
            &mut session.input,
            &mut session.variables,
            sink,
        );
        let signal = on_enter(&mut ctx).map_err(|source| EngineError::Precondition {
            state: session.state.clone(),
            source,
        })?;

        if signal.is_hook_result() {
            Ok(signal)
        } else {
            Err(EngineError::InvalidSignal {
                state: session.state.clone(),
                signal,
            })
        }
    }
}

/// Assembles graph and hooks, validating them against each other
pub struct FlowBuilder {
    name: String,
    graph: GraphBuilder,
    hooks: HookRegistry,
    max_hops: usize,
}

impl FlowBuilder {
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    pub fn build(self) -> Result<Arc<Flow>, GraphError> {
        let graph = self.graph.build()?;

        if let Some(unknown) = self.hooks.states().find(|s| !graph.contains(s)) {
            return Err(GraphError::UnknownHookState(unknown.clone()));
        }
        if let Some(missing) = graph
            .entered_states()
            .into_iter()
            .find(|s| self.hooks.enter_hook(s).is_none())
        {
            return Err(GraphError::MissingEnterHook(missing.clone()));
        }

        tracing::debug!(
            flow = %self.name,
            states = graph.states().count(),
            "Flow built"
        );

        Ok(Arc::new(Flow {
            name: self.name,
            graph,
            hooks: self.hooks,
            max_hops: self.max_hops,
        }))
    }
}
