//! Runtime for driving conversations
//!
//! Loads a session, recovers it, runs one turn and persists the result.
//! Turns for the same session id never overlap.

mod executor;
mod recovery;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{execute_turn, TurnExecution};
pub use recovery::{recover, RecoveryDecision, RecoveryReason};
pub use traits::*;

use crate::db::SessionRecord;
use crate::state_machine::{EngineError, Flow, OutboundMessage, TurnReport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Type alias for the production runtime backed by SQLite
pub type ProductionRuntime = RuntimeManager<DatabaseStorage>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("turn task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a handled turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub report: TurnReport,
    pub messages: Vec<OutboundMessage>,
    pub recovery: RecoveryReason,
}

/// Serializes and persists turns for every session of one flow
pub struct RuntimeManager<S: Storage> {
    flow: Arc<Flow>,
    storage: S,
    /// One async lock per session id
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: Storage> RuntimeManager<S> {
    pub fn new(flow: Arc<Flow>, storage: S) -> Self {
        Self {
            flow,
            storage,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Drop our handle and forget the lock once no other turn holds or awaits it
    async fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock().await;
        drop(lock);
        if locks.get(session_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(session_id);
        }
    }

    /// Run one turn of `session_id` with `input`.
    ///
    /// A failed turn is not persisted: the stored snapshot stays at the last
    /// completed turn and nothing emitted during the failed turn is logged.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        input: Option<String>,
    ) -> Result<TurnOutcome, RuntimeError> {
        let lock = self.session_lock(session_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.run_turn(session_id, input).await
        };
        self.release_session_lock(session_id, lock).await;
        outcome
    }

    async fn run_turn(&self, session_id: &str, input: Option<String>) -> Result<TurnOutcome, RuntimeError> {
        let record = self
            .storage
            .load(session_id)
            .await
            .map_err(RuntimeError::Storage)?;
        let decision = recover(&self.flow, record.as_ref());

        match &decision.reason {
            RecoveryReason::FreshSession => {
                self.storage
                    .create(session_id, self.flow.name(), &decision.session.save())
                    .await
                    .map_err(RuntimeError::Storage)?;
                tracing::info!(session_id = %session_id, flow = %self.flow.name(), "Session created");
            }
            RecoveryReason::Resumed => {}
            RecoveryReason::RestartedAfterEnd => {
                tracing::info!(session_id = %session_id, "Conversation restarted after completion");
            }
            reason @ (RecoveryReason::UnknownState { .. } | RecoveryReason::FlowChanged { .. }) => {
                tracing::warn!(session_id = %session_id, ?reason, "Stored session reset");
            }
        }

        let execution = execute_turn(Arc::clone(&self.flow), decision.session, input).await?;
        let report = match execution.result {
            Ok(report) => report,
            Err(e) => {
                if e.is_structural() {
                    tracing::error!(session_id = %session_id, error = %e, "Flow defect surfaced during turn");
                } else {
                    tracing::warn!(session_id = %session_id, error = %e, "Turn failed");
                }
                return Err(e.into());
            }
        };

        let awaiting = (!report.ended).then_some(report.signal);
        self.storage
            .save_turn(session_id, &execution.session.save(), awaiting, &execution.messages)
            .await
            .map_err(RuntimeError::Storage)?;

        tracing::info!(
            session_id = %session_id,
            state = %execution.session.state,
            signal = %report.signal,
            hops = report.visited.len(),
            ended = report.ended,
            messages = execution.messages.len(),
            "Turn completed"
        );

        Ok(TurnOutcome {
            report,
            messages: execution.messages,
            recovery: decision.reason,
        })
    }

    /// Sessions suspended in `AwaitCallback` for longer than `timeout`.
    ///
    /// What to do with them is up to the caller.
    pub async fn stale_callbacks(&self, timeout: Duration) -> Result<Vec<SessionRecord>, RuntimeError> {
        let cutoff = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self
            .storage
            .awaiting_callback_since(cutoff)
            .await
            .map_err(RuntimeError::Storage)?;

        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), timeout_secs = timeout.as_secs(), "Sessions waiting on a collaborator");
        }
        Ok(stale)
    }
}
