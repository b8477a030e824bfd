//! Database module for the advisor bot
//!
//! Persists session snapshots and the outbound message log.

mod schema;

pub use schema::*;

use crate::state_machine::{OutboundMessage, Snapshot, StateId, TurnSignal, Variables};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Session already exists: {0}")]
    SessionExists(String),
    #[error("Corrupt {what} for session {id}: {source}")]
    Corrupt {
        id: String,
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Columns as stored, decoded outside the row callback
struct RawSession {
    id: String,
    flow: String,
    state: String,
    variables: String,
    awaiting: Option<String>,
    created_at: String,
    updated_at: String,
}

const SESSION_COLUMNS: &str = "id, flow, state, variables, awaiting, created_at, updated_at";

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Session Operations ====================

    /// Create a session record from an initial snapshot
    pub fn create_session(&self, id: &str, flow: &str, snapshot: &Snapshot) -> DbResult<SessionRecord> {
        let conn = self.conn()?;
        let now = Utc::now();
        let variables = encode_variables(id, &snapshot.variables)?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(DbError::SessionExists(id.to_string()));
        }

        conn.execute(
            "INSERT INTO sessions (id, flow, state, variables, awaiting, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
            params![id, flow, snapshot.state.as_str(), variables, now.to_rfc3339()],
        )?;

        Ok(SessionRecord {
            id: id.to_string(),
            flow: flow.to_string(),
            snapshot: snapshot.clone(),
            awaiting: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get session by ID
    pub fn get_session(&self, id: &str) -> DbResult<SessionRecord> {
        self.find_session(id)?
            .ok_or_else(|| DbError::SessionNotFound(id.to_string()))
    }

    /// Get session by ID, `None` when it was never created
    pub fn find_session(&self, id: &str) -> DbResult<Option<SessionRecord>> {
        let raw = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            stmt.query_row(params![id], read_session_row).optional()?
        };
        raw.map(decode_session).transpose()
    }

    /// Persist the snapshot produced by a turn.
    ///
    /// `awaiting` records which suspend the session stopped on so sessions
    /// parked on a collaborator can be found later.
    pub fn save_snapshot(
        &self,
        id: &str,
        snapshot: &Snapshot,
        awaiting: Option<TurnSignal>,
    ) -> DbResult<()> {
        let conn = self.conn()?;
        update_snapshot(&conn, id, snapshot, awaiting)
    }

    /// Persist a completed turn: the snapshot and every message it emitted,
    /// in one transaction. Either all of it lands or none of it does.
    pub fn save_turn(
        &self,
        id: &str,
        snapshot: &Snapshot,
        awaiting: Option<TurnSignal>,
        messages: &[OutboundMessage],
    ) -> DbResult<Vec<MessageRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        update_snapshot(&tx, id, snapshot, awaiting)?;
        let records = messages
            .iter()
            .map(|message| insert_message(&tx, id, message))
            .collect::<DbResult<Vec<_>>>()?;

        tx.commit()?;
        Ok(records)
    }

    /// List sessions, most recently updated first
    pub fn list_sessions(&self) -> DbResult<Vec<SessionRecord>> {
        let raw = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC"
            ))?;
            let rows = stmt.query_map([], read_session_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        raw.into_iter().map(decode_session).collect()
    }

    /// Sessions suspended on a collaborator and not touched since `cutoff`
    pub fn sessions_awaiting_callback_since(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<SessionRecord>> {
        let raw = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE awaiting = ?1 AND updated_at < ?2
                 ORDER BY updated_at ASC"
            ))?;
            let rows = stmt.query_map(
                params![TurnSignal::AwaitCallback.as_str(), cutoff.to_rfc3339()],
                read_session_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        raw.into_iter().map(decode_session).collect()
    }

    /// Delete a session and all its messages
    pub fn delete_session(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;

        // Messages are deleted by CASCADE
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== Message Operations ====================

    /// Append an outbound message to the session's log
    pub fn append_message(&self, session_id: &str, message: &OutboundMessage) -> DbResult<MessageRecord> {
        let conn = self.conn()?;
        insert_message(&conn, session_id, message)
    }

    /// Get the message log for a session in emission order
    pub fn get_messages(&self, session_id: &str) -> DbResult<Vec<MessageRecord>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, session_id, sequence_id, content, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|(id, session_id, sequence_id, content, created_at)| {
                let message: OutboundMessage =
                    serde_json::from_str(&content).map_err(|source| DbError::Corrupt {
                        id: session_id.clone(),
                        what: "message",
                        source,
                    })?;
                Ok(MessageRecord {
                    id,
                    session_id,
                    sequence_id,
                    destination: message.destination.clone(),
                    message,
                    created_at: parse_datetime(&created_at),
                })
            })
            .collect()
    }
}

fn update_snapshot(
    conn: &Connection,
    id: &str,
    snapshot: &Snapshot,
    awaiting: Option<TurnSignal>,
) -> DbResult<()> {
    let variables = encode_variables(id, &snapshot.variables)?;

    let updated = conn.execute(
        "UPDATE sessions SET state = ?1, variables = ?2, awaiting = ?3, updated_at = ?4 WHERE id = ?5",
        params![
            snapshot.state.as_str(),
            variables,
            awaiting.map(TurnSignal::as_str),
            Utc::now().to_rfc3339(),
            id,
        ],
    )?;

    if updated == 0 {
        return Err(DbError::SessionNotFound(id.to_string()));
    }
    Ok(())
}

fn insert_message(conn: &Connection, session_id: &str, message: &OutboundMessage) -> DbResult<MessageRecord> {
    let now = Utc::now();
    let id = uuid::Uuid::new_v4().to_string();

    // Get next sequence ID
    let sequence_id: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;

    let content = serde_json::to_string(message).map_err(|source| DbError::Corrupt {
        id: session_id.to_string(),
        what: "message",
        source,
    })?;

    conn.execute(
        "INSERT INTO messages (id, session_id, sequence_id, destination, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            session_id,
            sequence_id,
            message.destination.to_string(),
            content,
            now.to_rfc3339(),
        ],
    )?;

    Ok(MessageRecord {
        id,
        session_id: session_id.to_string(),
        sequence_id,
        destination: message.destination.clone(),
        message: message.clone(),
        created_at: now,
    })
}

fn read_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSession> {
    Ok(RawSession {
        id: row.get(0)?,
        flow: row.get(1)?,
        state: row.get(2)?,
        variables: row.get(3)?,
        awaiting: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn decode_session(raw: RawSession) -> DbResult<SessionRecord> {
    let variables: Variables =
        serde_json::from_str(&raw.variables).map_err(|source| DbError::Corrupt {
            id: raw.id.clone(),
            what: "variables",
            source,
        })?;
    let awaiting = raw
        .awaiting
        .map(|s| serde_json::from_value::<TurnSignal>(serde_json::Value::String(s)))
        .transpose()
        .map_err(|source| DbError::Corrupt {
            id: raw.id.clone(),
            what: "awaiting signal",
            source,
        })?;

    Ok(SessionRecord {
        snapshot: Snapshot {
            state: StateId::from(raw.state),
            variables,
        },
        id: raw.id,
        flow: raw.flow,
        awaiting,
        created_at: parse_datetime(&raw.created_at),
        updated_at: parse_datetime(&raw.updated_at),
    })
}

fn encode_variables(id: &str, variables: &Variables) -> DbResult<String> {
    serde_json::to_string(variables).map_err(|source| DbError::Corrupt {
        id: id.to_string(),
        what: "variables",
        source,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(state: &str) -> Snapshot {
        let mut variables = Variables::new();
        variables.set("service_picked", "2");
        Snapshot {
            state: StateId::from(state),
            variables,
        }
    }

    #[test]
    fn test_create_and_get_session() {
        let db = Database::open_in_memory().unwrap();

        let created = db.create_session("s-1", "cheque_bounce", &snapshot("zero")).unwrap();
        assert_eq!(created.awaiting, None);

        let fetched = db.get_session("s-1").unwrap();
        assert_eq!(fetched.flow, "cheque_bounce");
        assert_eq!(fetched.snapshot, snapshot("zero"));
        assert!(db.find_session("missing").unwrap().is_none());
        assert!(matches!(
            db.get_session("missing"),
            Err(DbError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_session("s-1", "f", &snapshot("zero")).unwrap();
        assert!(matches!(
            db.create_session("s-1", "f", &snapshot("zero")),
            Err(DbError::SessionExists(_))
        ));
    }

    #[test]
    fn test_save_snapshot_records_awaiting() {
        let db = Database::open_in_memory().unwrap();
        db.create_session("s-1", "f", &snapshot("zero")).unwrap();

        db.save_snapshot("s-1", &snapshot("fetch_answer"), Some(TurnSignal::AwaitCallback))
            .unwrap();
        let record = db.get_session("s-1").unwrap();
        assert_eq!(record.snapshot.state, "fetch_answer");
        assert!(record.is_awaiting_callback());

        assert!(matches!(
            db.save_snapshot("missing", &snapshot("zero"), None),
            Err(DbError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_awaiting_callback_since_cutoff() {
        let db = Database::open_in_memory().unwrap();
        db.create_session("waiting", "f", &snapshot("zero")).unwrap();
        db.create_session("chatting", "f", &snapshot("zero")).unwrap();
        db.save_snapshot("waiting", &snapshot("fetch_answer"), Some(TurnSignal::AwaitCallback))
            .unwrap();
        db.save_snapshot("chatting", &snapshot("main_menu"), Some(TurnSignal::AwaitInput))
            .unwrap();

        let future = Utc::now() + Duration::seconds(60);
        let stale = db.sessions_awaiting_callback_since(future).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "waiting");

        let past = Utc::now() - Duration::seconds(60);
        assert!(db.sessions_awaiting_callback_since(past).unwrap().is_empty());
    }

    #[test]
    fn test_messages_in_sequence_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        db.create_session("s-1", "f", &snapshot("zero")).unwrap();

        db.append_message("s-1", &OutboundMessage::text("hello")).unwrap();
        let second = db
            .append_message("s-1", &OutboundMessage::text("query").to_collaborator("retrieval"))
            .unwrap();
        assert_eq!(second.sequence_id, 2);

        let messages = db.get_messages("s-1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message.body, "hello");
        assert_eq!(messages[1].destination.to_string(), "retrieval");

        db.delete_session("s-1").unwrap();
        assert!(db.get_messages("s-1").unwrap().is_empty());
        assert!(db.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");

        {
            let db = Database::open(&path).unwrap();
            db.create_session("s-1", "f", &snapshot("zero")).unwrap();
            db.save_snapshot("s-1", &snapshot("main_menu"), Some(TurnSignal::AwaitInput))
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let record = db.get_session("s-1").unwrap();
        assert_eq!(record.snapshot.state, "main_menu");
        assert_eq!(record.awaiting, Some(TurnSignal::AwaitInput));
    }

    #[test]
    fn test_save_turn_is_all_or_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.create_session("s-1", "f", &snapshot("zero")).unwrap();

        let records = db
            .save_turn(
                "s-1",
                &snapshot("greet"),
                Some(TurnSignal::AwaitInput),
                &[OutboundMessage::text("hello"), OutboundMessage::text("menu")],
            )
            .unwrap();
        assert_eq!(records[1].sequence_id, 2);
        assert_eq!(db.get_session("s-1").unwrap().snapshot.state, "greet");

        // Unknown session: the snapshot update fails and no message is kept
        assert!(matches!(
            db.save_turn("missing", &snapshot("greet"), None, &[OutboundMessage::text("lost")]),
            Err(DbError::SessionNotFound(_))
        ));
        assert!(db.get_messages("missing").unwrap().is_empty());
        assert_eq!(db.get_messages("s-1").unwrap().len(), 2);
    }
}
