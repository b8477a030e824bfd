//! Mock implementations for testing
//!
//! These mocks enable runtime testing without real I/O.

use super::traits::{MessageStore, SessionStore};
use crate::db::{MessageRecord, SessionRecord};
use crate::state_machine::{OutboundMessage, Snapshot, TurnSignal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// Mock Storage
// ============================================================================

/// In-memory storage with failure injection
#[allow(dead_code)]
#[derive(Default)]
pub struct MockStorage {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    messages: Mutex<Vec<MessageRecord>>,
    fail_saves: AtomicBool,
    /// Number of `save_turn` calls that reached storage
    pub save_count: Mutex<usize>,
}

#[allow(dead_code)]
impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing the runtime
    pub fn seed(&self, record: SessionRecord) {
        self.sessions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Make every following `save_turn` fail
    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub fn message_bodies(&self, session_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| m.message.body.clone())
            .collect()
    }
}

#[async_trait]
impl SessionStore for MockStorage {
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, String> {
        Ok(self.session(session_id))
    }

    async fn create(&self, session_id: &str, flow: &str, snapshot: &Snapshot) -> Result<(), String> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(session_id) {
            return Err(format!("Session already exists: {session_id}"));
        }
        let now = Utc::now();
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                id: session_id.to_string(),
                flow: flow.to_string(),
                snapshot: snapshot.clone(),
                awaiting: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn save_turn(
        &self,
        session_id: &str,
        snapshot: &Snapshot,
        awaiting: Option<TurnSignal>,
        messages: &[OutboundMessage],
    ) -> Result<(), String> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err("Injected save failure".to_string());
        }
        *self.save_count.lock().unwrap() += 1;

        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| format!("Session not found: {session_id}"))?;
        record.snapshot = snapshot.clone();
        record.awaiting = awaiting;
        record.updated_at = Utc::now();

        let mut log = self.messages.lock().unwrap();
        let mut sequence_id = log.iter().filter(|m| m.session_id == session_id).count() as i64;
        for message in messages {
            sequence_id += 1;
            log.push(MessageRecord {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                sequence_id,
                destination: message.destination.clone(),
                message: message.clone(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn awaiting_callback_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>, String> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.is_awaiting_callback() && r.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageStore for MockStorage {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, String> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}
