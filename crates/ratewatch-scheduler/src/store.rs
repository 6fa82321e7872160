//! File-based state store: one human-readable JSON document.
//! Reads once at open; every write replaces the file through a sibling temp
//! file and a rename, so a crash mid-write leaves the previous document intact.

use ratewatch_core::traits::StateStore;
use ratewatch_core::{RatewatchError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// JSON-file [`StateStore`].
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = if path.exists() {
            let json = std::fs::read_to_string(path)?;
            serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse {}: {e}, starting empty", path.display());
                Map::new()
            })
        } else {
            Map::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flush(&self, entries: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| RatewatchError::Store(format!("Write {}: {e}", self.path.display())))?;
        tracing::trace!("💾 Saved {} keys to {}", entries.len(), self.path.display());
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries();
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_survives_reopen() {
        let dir = std::env::temp_dir().join("ratewatch-json-store-test");
        let path = dir.join("state.json");
        std::fs::remove_dir_all(&dir).ok();

        let store = JsonFileStore::open(&path).unwrap();
        store.set("hotels", serde_json::json!([{"id": 1}])).unwrap();
        store.set("pauseReason", serde_json::json!("all_strike_login_check")).unwrap();
        store.remove("pauseReason").unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("hotels").unwrap(), Some(serde_json::json!([{"id": 1}])));
        assert!(reopened.get("pauseReason").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_interrupted_write_keeps_last_document() {
        let dir = std::env::temp_dir().join("ratewatch-json-store-interrupted");
        let path = dir.join("state.json");
        std::fs::remove_dir_all(&dir).ok();

        let store = JsonFileStore::open(&path).unwrap();
        store.set("hotels", serde_json::json!([{"id": 7}])).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        drop(store);

        // A crash between writing the temp file and the rename.
        std::fs::write(path.with_extension("json.tmp"), "{\"hotels\": [{\"id\"").unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("hotels").unwrap(), Some(serde_json::json!([{"id": 7}])));

        reopened.set("batchState", serde_json::json!({"batchId": 3})).unwrap();
        let again = JsonFileStore::open(&path).unwrap();
        assert_eq!(again.get("hotels").unwrap(), Some(serde_json::json!([{"id": 7}])));
        assert_eq!(again.get("batchState").unwrap(), Some(serde_json::json!({"batchId": 3})));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = std::env::temp_dir().join("ratewatch-json-store-corrupt");
        let path = dir.join("state.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get("batchState").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
