//! Durable key-value state shared with the UI.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// Well-known State Store keys.
pub mod keys {
    pub const BATCH_STATE: &str = "batchState";
    pub const BATCH_QUEUE: &str = "batchQueue";
    pub const RECENT_HISTORY: &str = "recentHistory";
    pub const TASK_CONFIG: &str = "taskConfig";
    pub const HOTELS: &str = "hotels";
    pub const PAUSE_REASON: &str = "pauseReason";
    pub const SCHEDULER_STATE: &str = "schedulerState";
    pub const LAST_TODAY_RUN: &str = "lastTodayRun";
    pub const LAST_FUTURE_RUN: &str = "lastFutureRun";
}

/// Key-value persistence surviving process restarts. Values are JSON.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Typed helpers over any [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Read and decode a key. Missing keys and undecodable values both yield `None`.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .get(key)?
            .and_then(|v| serde_json::from_value(v).ok()))
    }

    fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?)
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
