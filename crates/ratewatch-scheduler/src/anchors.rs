//! Wall-clock anchor math for the precision alarms.
//! Pure functions of "now": no timers, no I/O.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

/// Next exact top of the hour strictly after `now`.
pub fn next_hourly(now: NaiveDateTime) -> NaiveDateTime {
    let floored = now
        .date()
        .and_time(NaiveTime::from_hms_opt(now.hour(), 0, 0).unwrap_or(NaiveTime::MIN));
    floored + Duration::hours(1)
}

/// Next `hour:00:00`: today if `now` is before that hour, tomorrow otherwise.
pub fn next_daily(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    if now.hour() < hour.min(23) {
        now.date().and_time(at)
    } else {
        (now.date() + Duration::days(1)).and_time(at)
    }
}

/// Parse a comma-separated hour list ("07,08,23,00"). Junk and out-of-range entries are dropped.
pub fn parse_active_hours(spec: &str) -> Vec<u32> {
    let mut hours: Vec<u32> = spec
        .split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .filter(|h| *h <= 23)
        .collect();
    hours.sort_unstable();
    hours.dedup();
    hours
}
