//! SQLite driver: one row per storage key with the blob in a JSON column.

use super::{StorageDriver, lock};
use crate::error::Result;
use crate::identity::SessionIdentity;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// Single-table SQLite backend.
///
/// Schema:
/// - `recall_storage(key TEXT PRIMARY KEY, agent TEXT, data TEXT, updated_at TEXT)`
pub struct SqliteDriver {
    conn: Mutex<Connection>,
}

impl SqliteDriver {
    /// Open or create a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::initialize(Connection::open(path)?)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS recall_storage (
                key TEXT PRIMARY KEY NOT NULL,
                agent TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS recall_storage_agent ON recall_storage(agent);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StorageDriver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>> {
        let conn = lock(&self.conn);
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM recall_storage WHERE key = ?1",
                params![identity.key()],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool> {
        let json = serde_json::to_string(data)?;
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "INSERT INTO recall_storage (key, agent, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![
                identity.key(),
                identity.agent_name,
                json,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        Ok(changed > 0)
    }

    fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let conn = lock(&self.conn);
        let removed = conn.execute(
            "DELETE FROM recall_storage WHERE key = ?1",
            params![identity.key()],
        )?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_replaces_previous_blob() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let id = SessionIdentity::new("bot").with_chat("c");

        driver.write(&id, &json!([1, 2])).unwrap();
        driver.write(&id, &json!([3])).unwrap();
        assert_eq!(driver.read(&id).unwrap(), Some(json!([3])));

        let count: i64 = lock(&driver.conn)
            .query_row("SELECT COUNT(*) FROM recall_storage", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn missing_key_reads_as_none() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        assert!(driver.read(&SessionIdentity::new("bot")).unwrap().is_none());
    }

    #[test]
    fn remove_reports_rows() {
        let driver = SqliteDriver::open_in_memory().unwrap();
        let id = SessionIdentity::new("bot");
        assert!(!driver.remove(&id).unwrap());
        driver.write(&id, &json!([])).unwrap();
        assert!(driver.remove(&id).unwrap());
    }

    #[test]
    fn data_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let id = SessionIdentity::new("bot").with_user("u");
        SqliteDriver::open(&path)
            .unwrap()
            .write(&id, &json!([{"a": true}]))
            .unwrap();
        let reopened = SqliteDriver::open(&path).unwrap();
        assert_eq!(reopened.read(&id).unwrap(), Some(json!([{"a": true}])));
    }
}
