//! Database schema and types

use crate::state_machine::{Destination, OutboundMessage, Snapshot, TurnSignal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    flow TEXT NOT NULL,
    state TEXT NOT NULL,
    variables TEXT NOT NULL DEFAULT '{}',
    awaiting TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_awaiting ON sessions(awaiting, updated_at);
CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    destination TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence_id);
";

/// Stored session: the engine snapshot plus bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub flow: String,
    pub snapshot: Snapshot,
    /// Suspend signal the session stopped on; `None` before the first turn
    /// and once the conversation has ended
    pub awaiting: Option<TurnSignal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_awaiting_callback(&self) -> bool {
        self.awaiting == Some(TurnSignal::AwaitCallback)
    }
}

/// One outbound message in a session's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub sequence_id: i64,
    pub destination: Destination,
    pub message: OutboundMessage,
    pub created_at: DateTime<Utc>,
}
