//! Session recovery logic
//!
//! Decides which session a turn runs against given what storage returned.

use crate::db::SessionRecord;
use crate::state_machine::{Flow, Session, StateId};

/// Result of analyzing a stored record
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryDecision {
    /// The session to run the turn against
    pub session: Session,
    /// Reason for the decision (for logging)
    pub reason: RecoveryReason,
}

/// Why we made a particular recovery decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryReason {
    /// No record in storage; the session must be created
    FreshSession,
    /// Stored snapshot is resumable as-is
    Resumed,
    /// Stored snapshot sits at the terminal state; the conversation starts over
    RestartedAfterEnd,
    /// Stored state is not part of the current graph
    UnknownState { state: StateId },
    /// Record was written by a different flow
    FlowChanged { flow: String },
}

impl RecoveryReason {
    /// Whether stored progress was discarded
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::UnknownState { .. } | Self::FlowChanged { .. })
    }
}

impl RecoveryDecision {
    fn restart(flow: &Flow, reason: RecoveryReason) -> Self {
        Self {
            session: flow.new_session(),
            reason,
        }
    }

    fn resume(record: &SessionRecord) -> Self {
        Self {
            session: Session::restore(record.snapshot.clone()),
            reason: RecoveryReason::Resumed,
        }
    }
}

/// Pick the session a new turn should run against.
///
/// A restored session always starts with a neutral signal and no input,
/// whatever the turn that saved it was doing.
pub fn recover(flow: &Flow, record: Option<&SessionRecord>) -> RecoveryDecision {
    let Some(record) = record else {
        return RecoveryDecision::restart(flow, RecoveryReason::FreshSession);
    };

    if record.flow != flow.name() {
        return RecoveryDecision::restart(
            flow,
            RecoveryReason::FlowChanged {
                flow: record.flow.clone(),
            },
        );
    }

    let state = &record.snapshot.state;
    if !flow.graph().contains(state) {
        return RecoveryDecision::restart(flow, RecoveryReason::UnknownState { state: state.clone() });
    }

    if flow.graph().is_terminal(state) {
        return RecoveryDecision::restart(flow, RecoveryReason::RestartedAfterEnd);
    }

    RecoveryDecision::resume(record)
}
