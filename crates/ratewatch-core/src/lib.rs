//! # Ratewatch Core
//!
//! Shared vocabulary for the rate watcher: configuration, the error type,
//! domain records (hotels, tasks, observations, progress snapshots) and the
//! collaborator traits the orchestrator and scheduler are written against.
//!
//! ## Collaborators
//! ```text
//! Clock          wall-clock "now" (local time)
//! AlarmProvider  named one-shot/periodic wake-ups
//! UnitFactory    browser tabs: create / probe / dispatch / destroy
//! StateStore     durable key-value state shared with the UI
//! Reporter       upstream price report
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use config::RatewatchConfig;
pub use error::{RatewatchError, Result};
pub use memory::MemoryStore;
pub use types::{
    BatchSnapshot, Hotel, Observation, PriceOutcome, SchedulerState, Task, TaskConfig, TaskKind,
};
