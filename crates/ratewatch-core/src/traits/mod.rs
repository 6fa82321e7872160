//! Collaborator traits the orchestrator and scheduler are written against.

pub mod alarm;
pub mod clock;
pub mod report;
pub mod store;
pub mod units;

pub use alarm::{AlarmProvider, AlarmSpec};
pub use clock::{Clock, FixedClock, SystemClock};
pub use report::{ReportAck, Reporter};
pub use store::{StateStore, StateStoreExt};
pub use units::{CommandType, Readiness, UnitCommand, UnitFactory, UnitId};
