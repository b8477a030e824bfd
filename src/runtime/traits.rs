//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the runtime with mock implementations.

use crate::db::{Database, DbError, MessageRecord, SessionRecord};
use crate::state_machine::{OutboundMessage, Snapshot, TurnSignal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Storage for session snapshots
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, `None` if it was never created
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, String>;

    /// Create a session from its initial snapshot
    async fn create(&self, session_id: &str, flow: &str, snapshot: &Snapshot) -> Result<(), String>;

    /// Persist a completed turn: the snapshot it left and the messages it
    /// emitted. Implementations must write both or neither.
    async fn save_turn(
        &self,
        session_id: &str,
        snapshot: &Snapshot,
        awaiting: Option<TurnSignal>,
        messages: &[OutboundMessage],
    ) -> Result<(), String>;

    /// Sessions parked in `AwaitCallback` since before `cutoff`
    async fn awaiting_callback_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>, String>;
}

/// Log of outbound messages, written by [`SessionStore::save_turn`]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, String>;
}

/// Combined storage trait for convenience
pub trait Storage: SessionStore + MessageStore {}
impl<T: SessionStore + MessageStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, String> {
        (**self).load(session_id).await
    }

    async fn create(&self, session_id: &str, flow: &str, snapshot: &Snapshot) -> Result<(), String> {
        (**self).create(session_id, flow, snapshot).await
    }

    async fn save_turn(
        &self,
        session_id: &str,
        snapshot: &Snapshot,
        awaiting: Option<TurnSignal>,
        messages: &[OutboundMessage],
    ) -> Result<(), String> {
        (**self).save_turn(session_id, snapshot, awaiting, messages).await
    }

    async fn awaiting_callback_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>, String> {
        (**self).awaiting_callback_since(cutoff).await
    }
}

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, String> {
        (**self).get_messages(session_id).await
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, String> {
        self.db.find_session(session_id).map_err(|e| e.to_string())
    }

    async fn create(&self, session_id: &str, flow: &str, snapshot: &Snapshot) -> Result<(), String> {
        self.db
            .create_session(session_id, flow, snapshot)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn save_turn(
        &self,
        session_id: &str,
        snapshot: &Snapshot,
        awaiting: Option<TurnSignal>,
        messages: &[OutboundMessage],
    ) -> Result<(), String> {
        self.db
            .save_turn(session_id, snapshot, awaiting, messages)
            .map(|_| ())
            .map_err(|e: DbError| e.to_string())
    }

    async fn awaiting_callback_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>, String> {
        self.db
            .sessions_awaiting_callback_since(cutoff)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, String> {
        self.db.get_messages(session_id).map_err(|e| e.to_string())
    }
}
