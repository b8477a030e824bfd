//! Picks the outgoing edge for a state given the turn's input and variables

use super::graph::{Edge, StateGraph};
use super::session::{FlowError, StateId, Variables};
use thiserror::Error;

/// Read-only view handed to guards
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub input: Option<&'a str>,
    pub variables: &'a Variables,
}

impl<'a> TurnContext<'a> {
    pub fn new(input: Option<&'a str>, variables: &'a Variables) -> Self {
        Self { input, variables }
    }

    pub fn input(&self) -> Option<&'a str> {
        self.input
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no edge from `{state}` matches input {input:?}")]
    NoMatchingEdge {
        state: StateId,
        input: Option<String>,
    },
    #[error("guard `{guard}` on edge `{state}` -> `{dest}` failed: {source}")]
    Guard {
        state: StateId,
        dest: StateId,
        guard: String,
        #[source]
        source: FlowError,
    },
}

/// Try the edges of `source` in priority order and return the first that
/// applies. Guards are evaluated lazily; a guard error aborts resolution.
pub fn resolve<'g>(
    graph: &'g StateGraph,
    source: &StateId,
    ctx: &TurnContext<'_>,
) -> Result<&'g Edge, ResolveError> {
    for edge in graph.outgoing(source) {
        let Some(guard) = &edge.guard else {
            tracing::debug!(state = %source, dest = %edge.dest, "Taking fallback edge");
            return Ok(edge);
        };

        let matched = guard.check(ctx).map_err(|e| ResolveError::Guard {
            state: source.clone(),
            dest: edge.dest.clone(),
            guard: guard.name().to_string(),
            source: e,
        })?;

        if matched {
            tracing::debug!(
                state = %source,
                dest = %edge.dest,
                guard = guard.name(),
                "Guard matched"
            );
            return Ok(edge);
        }
    }

    Err(ResolveError::NoMatchingEdge {
        state: source.clone(),
        input: ctx.input.map(String::from),
    })
}
