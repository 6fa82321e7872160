//! Named wake-ups at absolute local times.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::error::Result;

pub const HOURLY_JOB: &str = "hourly_job";
pub const DAILY_JOB: &str = "daily_job";
pub const BATCH_KEEPALIVE: &str = "batch_keepalive";

/// One armed alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmSpec {
    pub name: String,
    pub next_fire: NaiveDateTime,
    /// `None` for one-shot alarms.
    #[serde(with = "period_secs")]
    pub period: Option<Duration>,
}

mod period_secs {
    use chrono::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(period: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match period {
            Some(p) => s.serialize_some(&p.num_seconds()),
            None => s.serialize_none(),
        }
    }
}

/// Schedules named wake events. Arming a name that is already armed replaces it.
pub trait AlarmProvider: Send + Sync {
    fn arm(&self, name: &str, first_fire: NaiveDateTime, period: Option<Duration>) -> Result<()>;
    fn disarm(&self, name: &str) -> Result<()>;
    fn armed(&self) -> Vec<AlarmSpec>;
}
