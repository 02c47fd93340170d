//! SQLite-backed key-value store
//!
//! A single `kv_store` table holds every persisted value. Batch writes run in
//! one transaction so a trial record and its status land together.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::{KeyValueStore, StorageError};

/// Helper to acquire the connection lock with poison recovery
fn acquire_lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, Connection>>| {
        warn!("Connection mutex was poisoned, recovering inner value");
        poisoned.into_inner()
    })
}

/// Persistent store in a local SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("Failed to create data dir: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn upsert(conn: &Connection, key: &str, value: &str, now_ms: i64) -> rusqlite::Result<usize> {
        conn.execute(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, now_ms],
        )
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = acquire_lock(&self.conn);
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = acquire_lock(&self.conn);
        Self::upsert(&conn, key, value, Utc::now().timestamp_millis())?;
        debug!(key = key, "Stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = acquire_lock(&self.conn);
        conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let mut conn = acquire_lock(&self.conn);
        let now_ms = Utc::now().timestamp_millis();

        let tx = conn.transaction()?;
        for (key, value) in entries {
            Self::upsert(&tx, key, value, now_ms)?;
        }
        tx.commit()?;

        debug!(count = entries.len(), "Stored batch");
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut conn = acquire_lock(&self.conn);

        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        }
        tx.commit()?;
        Ok(())
    }
}
