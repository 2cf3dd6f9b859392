//! Multi-row SQLite driver: a session row plus one child row per item.
//!
//! Every write rewrites the session's items inside one transaction: delete
//! all child rows, then insert the new ones in order. Readers therefore see
//! either the old collection or the new one, never a mix.

use super::{StorageDriver, lock};
use crate::error::{RecallError, Result};
use crate::identity::SessionIdentity;
use crate::item::json_kind;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Relational backend for message-shaped collections.
///
/// Schema:
/// - `recall_sessions`: one row per storage key (agent, chat, user, group, scope)
/// - `recall_messages`: ordered items per session, `role` extracted for querying
pub struct SqliteMessageDriver {
    conn: Mutex<Connection>,
}

impl SqliteMessageDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::initialize(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS recall_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                agent TEXT NOT NULL,
                chat TEXT,
                user_id TEXT,
                grp TEXT,
                scope TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recall_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                role TEXT,
                payload TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES recall_sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS recall_messages_session
                ON recall_messages(session_id, position);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of item rows stored for `identity`.
    pub fn message_count(&self, identity: &SessionIdentity) -> Result<usize> {
        let conn = lock(&self.conn);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM recall_messages m
             JOIN recall_sessions s ON s.id = m.session_id
             WHERE s.key = ?1",
            params![identity.key()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl StorageDriver for SqliteMessageDriver {
    fn name(&self) -> &str {
        "sqlite_messages"
    }

    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>> {
        let conn = lock(&self.conn);
        let session_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM recall_sessions WHERE key = ?1",
                params![identity.key()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(session_id) = session_id else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT payload FROM recall_messages WHERE session_id = ?1 ORDER BY position",
        )?;
        let payloads = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let items = payloads
            .iter()
            .map(|p| serde_json::from_str(p))
            .collect::<std::result::Result<Vec<Value>, _>>()?;
        Ok(Some(Value::Array(items)))
    }

    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool> {
        let Value::Array(items) = data else {
            return Err(RecallError::invalid(format!(
                "sqlite_messages driver stores arrays, got {}",
                json_kind(data)
            )));
        };

        let now = chrono::Utc::now().to_rfc3339();
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO recall_sessions (key, agent, chat, user_id, grp, scope, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(key) DO UPDATE SET updated_at = excluded.updated_at, grp = excluded.grp",
            params![
                identity.key(),
                identity.agent_name,
                identity.chat_name,
                identity.user_id,
                identity.group,
                identity.scope,
                now
            ],
        )?;
        let session_id: i64 = tx.query_row(
            "SELECT id FROM recall_sessions WHERE key = ?1",
            params![identity.key()],
            |row| row.get(0),
        )?;

        tx.execute(
            "DELETE FROM recall_messages WHERE session_id = ?1",
            params![session_id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO recall_messages (session_id, position, role, payload)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, item) in items.iter().enumerate() {
                let role = item.get("role").and_then(Value::as_str);
                insert.execute(params![
                    session_id,
                    position as i64,
                    role,
                    serde_json::to_string(item)?
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Rewrote {} item row(s) for {}",
            items.len(),
            identity.key()
        );
        Ok(true)
    }

    fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let conn = lock(&self.conn);
        let removed = conn.execute(
            "DELETE FROM recall_sessions WHERE key = ?1",
            params![identity.key()],
        )?;
        Ok(removed > 0)
    }
}
