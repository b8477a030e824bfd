//! Immutable table of states and guarded edges
//!
//! Edge priority is a property of the graph, not of construction order:
//! for a given source, guarded edges are tried newest-declared first, and
//! the single unconditional edge (the default advance) is always tried last.

use super::resolver::TurnContext;
use super::session::{FlowError, StateId};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

type Predicate = dyn Fn(&TurnContext<'_>) -> Result<bool, FlowError> + Send + Sync;

/// Named, pure predicate over `(input, variables)`
#[derive(Clone)]
pub struct Guard {
    name: Arc<str>,
    predicate: Arc<Predicate>,
}

impl Guard {
    pub fn new<F>(name: impl AsRef<str>, predicate: F) -> Self
    where
        F: Fn(&TurnContext<'_>) -> Result<bool, FlowError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, ctx: &TurnContext<'_>) -> Result<bool, FlowError> {
        (self.predicate)(ctx)
    }

    /// Matches every turn; use for an explicit edge that outranks the fallback
    pub fn always() -> Self {
        Self::new("always", |_| Ok(true))
    }

    /// Input equals `expected` exactly (after trimming whitespace)
    pub fn input_eq(expected: &str) -> Self {
        let expected = expected.to_string();
        Self::new(format!("input_eq({expected})"), move |ctx| {
            Ok(ctx.input().map(str::trim) == Some(expected.as_str()))
        })
    }

    pub fn input_in(accepted: &[&str]) -> Self {
        let accepted: Vec<String> = accepted.iter().map(ToString::to_string).collect();
        Self::new(format!("input_in({})", accepted.join("|")), move |ctx| {
            Ok(ctx
                .input()
                .map(str::trim)
                .is_some_and(|input| accepted.iter().any(|a| a == input)))
        })
    }

    /// True for a missing input or one outside `accepted`
    pub fn input_not_in(accepted: &[&str]) -> Self {
        let inner = Self::input_in(accepted);
        let name = format!("not_{}", inner.name());
        Self::new(name, move |ctx| inner.check(ctx).map(|ok| !ok))
    }

    /// Boolean variable written by an earlier hook; unset is a defect
    pub fn flag(variable: &str) -> Self {
        let variable = variable.to_string();
        Self::new(format!("flag({variable})"), move |ctx| {
            ctx.variables.require_bool(&variable)
        })
    }

    /// String variable written by an earlier hook equals `expected`; unset is a defect
    pub fn var_eq(variable: &str, expected: &str) -> Self {
        let variable = variable.to_string();
        let expected = expected.to_string();
        Self::new(format!("var_eq({variable}={expected})"), move |ctx| {
            ctx.variables.require_str(&variable).map(|v| v == expected)
        })
    }

    pub fn not_flag(variable: &str) -> Self {
        let variable = variable.to_string();
        Self::new(format!("not_flag({variable})"), move |ctx| {
            ctx.variables.require_bool(&variable).map(|v| !v)
        })
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub source: StateId,
    pub dest: StateId,
    /// `None` for the unconditional fallback
    pub guard: Option<Guard>,
}

impl Edge {
    pub fn is_fallback(&self) -> bool {
        self.guard.is_none()
    }
}

/// Authoring defects detected when the graph is built
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("initial and terminal state are both `{0}`")]
    InitialIsTerminal(StateId),
    #[error("state `{state}` already advances unconditionally to `{existing}`, cannot add `{dest}`")]
    DuplicateFallback {
        state: StateId,
        existing: StateId,
        dest: StateId,
    },
    #[error("terminal state `{0}` must not have outgoing edges")]
    TerminalHasEdges(StateId),
    #[error("state `{0}` has no outgoing edges and is not terminal")]
    DeadEnd(StateId),
    #[error("terminal state `{0}` is not reachable from the initial state")]
    TerminalUnreachable(StateId),
    #[error("state `{0}` is entered but has no enter hook")]
    MissingEnterHook(StateId),
    #[error("hook registered for unknown state `{0}`")]
    UnknownHookState(StateId),
}

#[derive(Debug, Default)]
struct EdgeSet {
    /// Declaration order
    guarded: Vec<(StateId, Guard)>,
    fallback: Option<StateId>,
}

/// Append-only builder; [`GraphBuilder::build`] freezes the graph
#[derive(Debug)]
pub struct GraphBuilder {
    initial: StateId,
    terminal: StateId,
    edges: HashMap<StateId, EdgeSet>,
    states: BTreeSet<StateId>,
    errors: Vec<GraphError>,
}

impl GraphBuilder {
    pub fn new(initial: impl Into<StateId>, terminal: impl Into<StateId>) -> Self {
        let initial = initial.into();
        let terminal = terminal.into();
        let mut states = BTreeSet::new();
        states.insert(initial.clone());
        states.insert(terminal.clone());
        Self {
            initial,
            terminal,
            edges: HashMap::new(),
            states,
            errors: Vec::new(),
        }
    }

    /// Unconditional edges between consecutive states: the default path
    pub fn add_chain<S: Into<StateId> + Clone>(&mut self, states: &[S]) -> &mut Self {
        for pair in states.windows(2) {
            self.add_edge(pair[0].clone(), pair[1].clone());
        }
        self
    }

    /// The single unconditional fallback for `source`
    pub fn add_edge(&mut self, source: impl Into<StateId>, dest: impl Into<StateId>) -> &mut Self {
        let source = source.into();
        let dest = dest.into();
        self.states.insert(source.clone());
        self.states.insert(dest.clone());

        let set = self.edges.entry(source.clone()).or_default();
        if let Some(existing) = &set.fallback {
            self.errors.push(GraphError::DuplicateFallback {
                state: source,
                existing: existing.clone(),
                dest,
            });
        } else {
            set.fallback = Some(dest);
        }
        self
    }

    /// A guarded edge, tried before the fallback of `source` and before any
    /// guarded edge declared earlier for the same source
    pub fn add_guarded_edge(
        &mut self,
        source: impl Into<StateId>,
        dest: impl Into<StateId>,
        guard: Guard,
    ) -> &mut Self {
        let source = source.into();
        let dest = dest.into();
        self.states.insert(source.clone());
        self.states.insert(dest.clone());
        self.edges.entry(source).or_default().guarded.push((dest, guard));
        self
    }

    pub fn build(self) -> Result<StateGraph, GraphError> {
        let Self {
            initial,
            terminal,
            edges,
            states,
            errors,
        } = self;

        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }
        if initial == terminal {
            return Err(GraphError::InitialIsTerminal(initial));
        }

        let mut outgoing: HashMap<StateId, Vec<Edge>> = HashMap::new();
        for (source, set) in edges {
            let mut ordered: Vec<Edge> = set
                .guarded
                .into_iter()
                .rev()
                .map(|(dest, guard)| Edge {
                    source: source.clone(),
                    dest,
                    guard: Some(guard),
                })
                .collect();
            if let Some(dest) = set.fallback {
                ordered.push(Edge {
                    source: source.clone(),
                    dest,
                    guard: None,
                });
            }
            outgoing.insert(source, ordered);
        }

        if outgoing.get(&terminal).is_some_and(|e| !e.is_empty()) {
            return Err(GraphError::TerminalHasEdges(terminal));
        }
        if let Some(dead) = states
            .iter()
            .find(|s| **s != terminal && outgoing.get(*s).map_or(true, Vec::is_empty))
        {
            return Err(GraphError::DeadEnd(dead.clone()));
        }

        let graph = StateGraph {
            initial,
            terminal,
            outgoing,
            states,
        };
        if !graph.reachable_states().contains(&graph.terminal) {
            return Err(GraphError::TerminalUnreachable(graph.terminal));
        }
        Ok(graph)
    }
}

/// Frozen graph, shared read-only by every session
#[derive(Debug)]
pub struct StateGraph {
    initial: StateId,
    terminal: StateId,
    /// Per source, in evaluation order
    outgoing: HashMap<StateId, Vec<Edge>>,
    states: BTreeSet<StateId>,
}

impl StateGraph {
    pub fn initial(&self) -> &StateId {
        &self.initial
    }

    pub fn terminal(&self) -> &StateId {
        &self.terminal
    }

    pub fn is_terminal(&self, state: &StateId) -> bool {
        *state == self.terminal
    }

    pub fn contains(&self, state: &StateId) -> bool {
        self.states.contains(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &StateId> {
        self.states.iter()
    }

    /// Edges leaving `source` in the order the resolver tries them
    pub fn outgoing(&self, source: &StateId) -> &[Edge] {
        self.outgoing.get(source).map_or(&[], Vec::as_slice)
    }

    /// Every state that is the destination of some edge
    pub fn entered_states(&self) -> BTreeSet<&StateId> {
        self.outgoing.values().flatten().map(|e| &e.dest).collect()
    }

    /// States reachable from the initial state, ignoring guards
    pub fn reachable_states(&self) -> BTreeSet<StateId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.initial.clone()]);
        while let Some(state) = queue.pop_front() {
            if !seen.insert(state.clone()) {
                continue;
            }
            for edge in self.outgoing(&state) {
                if !seen.contains(&edge.dest) {
                    queue.push_back(edge.dest.clone());
                }
            }
        }
        seen
    }
}
