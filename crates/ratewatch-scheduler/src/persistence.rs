//! SQLite-backed state store: survives restarts, tolerates concurrent readers.

use chrono::Utc;
use ratewatch_core::traits::StateStore;
use ratewatch_core::{RatewatchError, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// SQLite key-value [`StateStore`].
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> RatewatchError + '_ {
    move |e| RatewatchError::Store(format!("{context}: {e}"))
}

impl SqliteStore {
    /// Open or create the state database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            PRAGMA journal_mode = WAL;

            -- Shared key-value state (batchState, recentHistory, hotels, ...)
            CREATE TABLE IF NOT EXISTS kv_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,          -- JSON document
                updated_at TEXT NOT NULL
            );
            ",
            )
            .map_err(db_err("Migration"))
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT key FROM kv_state ORDER BY key")
            .map_err(db_err("Prepare"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err("Query"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Row"))
    }
}

impl StateStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv_state WHERE key = ?1", [key], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(db_err("Get"))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let json = serde_json::to_string(&value)?;
        self.conn()
            .execute(
                "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, json, Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Set"))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM kv_state WHERE key = ?1", [key])
            .map_err(db_err("Remove"))?;
        Ok(())
    }
}
