//! # Ratewatch Orchestrator
//!
//! Turns a list of "observe this URL for this date" tasks into a supervised,
//! bounded-concurrency schedule over execution units.
//!
//! ```text
//! load(tasks) ──▶ queue ──process()──▶ create unit ──▶ handshake ──▶ dispatch
//!                   ▲                        │                          │
//!                   │                   60s timeout              submit(price)
//!                   └──── refill ◀── complete_task ◀──────────────────────┘
//!                                         │
//!                              ResultSink (dedup + history)
//!                              circuit breaker, BatchEvent broadcast
//! ```

pub mod events;
pub mod orchestrator;
pub mod run;
pub mod sink;

pub use events::BatchEvent;
pub use orchestrator::{Collaborators, Orchestrator};
pub use run::BatchRun;
pub use sink::ResultSink;
