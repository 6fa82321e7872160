//! # Ratewatch Scheduler
//!
//! Wall-clock scheduling around the orchestrator.
//!
//! ```text
//!  TokioAlarms ──wake(name)──▶ run_alarm_loop ──▶ PrecisionScheduler
//!   hourly_job  (top of hour)                      ├─ handle_hourly → today tasks
//!   daily_job   (05:00)                            ├─ handle_daily  → future tasks
//!   batch_keepalive (30s)                          └─ heartbeat
//!                                                        │
//!                                                   Orchestrator ──▶ HttpReporter
//!                                                        │
//!                                          SqliteStore | JsonFileStore
//! ```

pub mod alarms;
pub mod anchors;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod store;
pub mod tasks;

pub use alarms::TokioAlarms;
pub use dispatch::HttpReporter;
pub use engine::{PrecisionScheduler, SchedulerInfo, run_alarm_loop};
pub use persistence::SqliteStore;
pub use store::JsonFileStore;
pub use tasks::ScheduleWindow;
