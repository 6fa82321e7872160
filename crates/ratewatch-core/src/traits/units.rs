//! Execution units: isolated contexts (browser tabs) that load one URL each.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Task, TaskKind};

/// Opaque handle of a live execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    StartScrapeToday,
    StartScrapeFuture,
}

/// Payload sent to a unit once it answers the readiness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitCommand {
    #[serde(rename = "type")]
    pub command: CommandType,
    pub target_date: NaiveDate,
    pub hotel_id: String,
}

impl UnitCommand {
    /// Future mode is used for future tasks and for any date other than today.
    pub fn for_task(task: &Task, today: NaiveDate) -> Self {
        let command = if task.kind == TaskKind::Future || task.target_date != today {
            CommandType::StartScrapeFuture
        } else {
            CommandType::StartScrapeToday
        };
        Self {
            command,
            target_date: task.target_date,
            hotel_id: task.hotel_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotYet,
}

/// Creates, drives and tears down execution units.
///
/// Completion messages travel the other way: the hosting surface routes them
/// into `Orchestrator::submit`.
#[async_trait]
pub trait UnitFactory: Send + Sync {
    /// Open a unit on `url`.
    async fn create(&self, url: &str) -> Result<UnitId>;

    /// Close a unit. Closing an unknown unit is not an error.
    async fn destroy(&self, unit: &UnitId) -> Result<()>;

    /// Send the scrape command.
    async fn dispatch(&self, unit: &UnitId, command: &UnitCommand) -> Result<()>;

    /// Readiness poll. Errors are treated as `NotYet` by callers.
    async fn probe(&self, unit: &UnitId) -> Result<Readiness>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(kind: TaskKind, date: NaiveDate) -> Task {
        Task {
            hotel_id: "7".into(),
            hotel_name: "Harbor Inn".into(),
            target_url: "https://example.com/hotels/7.html".into(),
            kind,
            target_date: date,
        }
    }

    #[test]
    fn test_command_mode_selection() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let tomorrow = today.succ_opt().unwrap();
        assert_eq!(
            UnitCommand::for_task(&task(TaskKind::Today, today), today).command,
            CommandType::StartScrapeToday
        );
        assert_eq!(
            UnitCommand::for_task(&task(TaskKind::Future, today), today).command,
            CommandType::StartScrapeFuture
        );
        // A "today" task held over midnight is no longer today.
        assert_eq!(
            UnitCommand::for_task(&task(TaskKind::Today, tomorrow), today).command,
            CommandType::StartScrapeFuture
        );
    }

    #[test]
    fn test_command_wire_shape() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let json = serde_json::to_value(UnitCommand::for_task(&task(TaskKind::Today, today), today)).unwrap();
        assert_eq!(json["type"], "START_SCRAPE_TODAY");
        assert_eq!(json["target_date"], "2026-05-10");
        assert_eq!(json["hotel_id"], "7");
    }
}
