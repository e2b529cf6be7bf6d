//! SQLite-backed store
//!
//! A single `objects` table inside `<data_dir>/store.db`. Several processes
//! on one host can share the database file.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::ObjectStore;
use crate::error::{Error, Result};

/// SQLite implementation of [`ObjectStore`]
pub struct SqliteObjectStore {
    /// Database connection
    conn: Mutex<Connection>,
    /// Database path, for logs
    path: String,
}

impl SqliteObjectStore {
    /// Create or open the store database
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("store.db");
        let conn = Connection::open(&db_path)?;
        Self::init(conn, db_path.display().to_string())
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn init(conn: Connection, path: String) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO objects (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value.as_ref()],
        )?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let conn = self.conn.lock().await;
        let value: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(Bytes::from))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT key FROM objects WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for result in rows {
            keys.push(result?);
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM objects WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO objects (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = CAST(value || ?2 AS BLOB), updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, data],
        )?;
        Ok(())
    }

    fn summary_name(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_store_basic() {
        let dir = tempdir().unwrap();
        let store = SqliteObjectStore::open(dir.path()).unwrap();

        store.put("node/a", Bytes::from_static(b"one")).await.unwrap();
        store.put("node/a", Bytes::from_static(b"two")).await.unwrap();
        store.put("nodes-other", Bytes::from_static(b"x")).await.unwrap();
        store.put("location/l1", Bytes::from_static(b"loc")).await.unwrap();

        assert_eq!(
            store.get("node/a").await.unwrap().unwrap(),
            Bytes::from_static(b"two")
        );
        assert_eq!(store.list("node/").await.unwrap(), vec!["node/a".to_string()]);

        store.delete("node/a").await.unwrap();
        assert!(store.get("node/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_append() {
        let store = SqliteObjectStore::open_in_memory().unwrap();
        store.append("change.log", b"a\n").await.unwrap();
        store.append("change.log", b"b\n").await.unwrap();
        assert_eq!(
            store.get("change.log").await.unwrap().unwrap(),
            Bytes::from_static(b"a\nb\n")
        );
    }

    #[tokio::test]
    async fn test_reopen_keeps_values() {
        let dir = tempdir().unwrap();
        {
            let store = SqliteObjectStore::open(dir.path()).unwrap();
            store.put("master", Bytes::from_static(b"node-1")).await.unwrap();
        }
        let store = SqliteObjectStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get("master").await.unwrap().unwrap(),
            Bytes::from_static(b"node-1")
        );
    }
}
