//! Task generation: turns the stored hotel list into today / future tasks.

use chrono::{Duration, NaiveDate};
use ratewatch_core::config::SchedulerConfig;
use ratewatch_core::types::active_unique;
use ratewatch_core::{Hotel, Task, TaskConfig};
use std::collections::HashSet;
use url::Url;

use crate::anchors::parse_active_hours;

/// Effective scheduling window: local config overlaid with the synced `taskConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub active_hours: Vec<u32>,
    pub min_days: u32,
    pub max_days: u32,
}

impl ScheduleWindow {
    pub fn resolve(local: &SchedulerConfig, synced: Option<&TaskConfig>) -> Self {
        let hours = synced
            .and_then(|c| c.active_hours.as_deref())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&local.active_hours);
        let min_days = synced
            .and_then(|c| c.future_days_min)
            .filter(|d| *d > 0)
            .unwrap_or(local.future_days_min);
        let max_days = synced
            .and_then(|c| c.future_days)
            .filter(|d| *d > 0)
            .unwrap_or(local.future_days);
        Self {
            active_hours: parse_active_hours(hours),
            // Never before tomorrow.
            min_days: min_days.max(1),
            max_days,
        }
    }

    pub fn is_active_hour(&self, hour: u32) -> bool {
        self.active_hours.contains(&hour)
    }
}

/// One `today` task per active hotel.
pub fn today_tasks(hotels: &[Hotel], today: NaiveDate) -> Vec<Task> {
    active_unique(hotels)
        .iter()
        .map(|h| Task::today(h, today))
        .collect()
}

/// Future tasks over `[min_days, max_days]` for every active hotel,
/// deduplicated by `(hotel_id, check-in)`.
pub fn future_tasks(hotels: &[Hotel], today: NaiveDate, window: &ScheduleWindow) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut seen = HashSet::new();

    for hotel in active_unique(hotels) {
        let Some(base) = hotel.resolved_url() else {
            tracing::warn!("⚠️ Hotel {} has no URL, skipping", hotel.name);
            continue;
        };
        for offset in window.min_days..=window.max_days {
            let check_in = today + Duration::days(offset as i64);
            if !seen.insert((hotel.id.clone(), check_in)) {
                continue;
            }
            match with_check_dates(base, check_in) {
                Some(url) => tasks.push(Task::future(&hotel, url, check_in)),
                None => {
                    tracing::warn!("⚠️ Invalid base URL for {}: {base}", hotel.name);
                    break;
                }
            }
        }
    }

    tracing::debug!(
        "🗓️ Generated {} future tasks (days {}..={})",
        tasks.len(),
        window.min_days,
        window.max_days
    );
    tasks
}

/// Rebuild `base` as origin + path with only `checkIn`/`checkOut` (next day) in the query.
pub fn with_check_dates(base: &str, check_in: NaiveDate) -> Option<String> {
    let mut url = Url::parse(base.trim()).ok()?;
    if url.cannot_be_a_base() || url.host().is_none() {
        return None;
    }
    let check_out = check_in + Duration::days(1);
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("checkIn", &check_in.to_string())
        .append_pair("checkOut", &check_out.to_string());
    Some(url.to_string())
}
