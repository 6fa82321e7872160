//! # Ratewatch Gateway
//!
//! HTTP/WebSocket surface of a running ratewatch instance:
//! - REST control API for the batch and the scheduler
//! - `/ws/progress` stream of batch events for the UI
//! - `/ws/units` bridge that lets the browser-side agent act as the execution-unit factory

pub mod bridge;
pub mod routes;
pub mod server;
pub mod ws;

pub use bridge::UnitBridge;
pub use server::{AppState, build_router, start};
