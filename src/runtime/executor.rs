//! Turn executor
//!
//! Runs the synchronous engine off the async workers. Hooks may block on
//! collaborator I/O, so a turn always gets its own blocking thread.

use super::RuntimeError;
use crate::state_machine::{EngineError, Flow, OutboundMessage, Session, TurnReport};
use std::sync::Arc;

/// Everything a finished blocking turn hands back
pub struct TurnExecution {
    pub session: Session,
    pub messages: Vec<OutboundMessage>,
    pub result: Result<TurnReport, EngineError>,
}

/// Drive one turn of `session` on a blocking thread
pub async fn execute_turn(
    flow: Arc<Flow>,
    mut session: Session,
    input: Option<String>,
) -> Result<TurnExecution, RuntimeError> {
    let execution = tokio::task::spawn_blocking(move || {
        let mut messages = Vec::new();
        let result = flow.process_turn(&mut session, input, &mut messages);
        TurnExecution {
            session,
            messages,
            result,
        }
    })
    .await?;
    Ok(execution)
}
