//! Domain records: hotels, tasks, observations and progress snapshots.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A monitored hotel listing, as synced from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, alias = "ctripUrl", skip_serializing_if = "Option::is_none")]
    pub ctrip_url: Option<String>,
    /// "self" for the operator's own property, "competitor" otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotel_type: Option<String>,
    #[serde(default = "bool_true", deserialize_with = "de_active")]
    pub is_active: bool,
    #[serde(
        default,
        alias = "storeId",
        deserialize_with = "de_opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub store_id: Option<String>,
}

fn bool_true() -> bool {
    true
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

/// Backend sends `is_active` as bool, 0/1, or "0"/"1". Anything but an explicit zero/false is active.
fn de_active<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !matches!(s.trim(), "0" | "false"),
        _ => true,
    })
}

impl Hotel {
    /// The listing URL, preferring `ctrip_url` over the legacy `url` field.
    pub fn resolved_url(&self) -> Option<&str> {
        [self.ctrip_url.as_deref(), self.url.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|u| !u.is_empty())
    }

    pub fn is_self(&self) -> bool {
        self.hotel_type.as_deref() == Some("self")
    }
}

/// Drop inactive hotels and repeated ids (first occurrence wins).
pub fn active_unique(hotels: &[Hotel]) -> Vec<Hotel> {
    let mut seen = std::collections::HashSet::new();
    hotels
        .iter()
        .filter(|h| h.is_active)
        .filter(|h| seen.insert(h.id.clone()))
        .cloned()
        .collect()
}

/// Which kind of observation a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Tonight's price.
    Today,
    /// A specific future check-in date.
    Future,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Today => write!(f, "today"),
            TaskKind::Future => write!(f, "future"),
        }
    }
}

/// One scheduled page observation. The URL is resolved once, at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub hotel_id: String,
    #[serde(default)]
    pub hotel_name: String,
    pub target_url: String,
    pub kind: TaskKind,
    pub target_date: NaiveDate,
}

impl Task {
    /// Tonight's price for a hotel. An unresolvable URL yields an empty `target_url`,
    /// which the orchestrator drops at admission.
    pub fn today(hotel: &Hotel, today: NaiveDate) -> Self {
        Self {
            hotel_id: hotel.id.clone(),
            hotel_name: hotel.name.clone(),
            target_url: hotel.resolved_url().unwrap_or_default().to_string(),
            kind: TaskKind::Today,
            target_date: today,
        }
    }

    /// A future check-in date with an already rewritten URL.
    pub fn future(hotel: &Hotel, target_url: String, date: NaiveDate) -> Self {
        Self {
            hotel_id: hotel.id.clone(),
            hotel_name: hotel.name.clone(),
            target_url,
            kind: TaskKind::Future,
            target_date: date,
        }
    }

    /// Task identity: `(hotel_id, target_date)`.
    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.hotel_id, self.target_date)
    }
}

/// What an execution unit reported for a page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub enum PriceOutcome {
    /// A positive price.
    Amount(f64),
    /// The page loaded but no room is bookable.
    SoldOut,
    /// Nothing could be extracted.
    Failed,
}

impl PriceOutcome {
    /// Wire convention: positive = price, negative = sold out, zero/absent = failure.
    pub fn from_wire(raw: Option<f64>) -> Self {
        match raw {
            Some(p) if p > 0.0 => PriceOutcome::Amount(p),
            Some(p) if p < 0.0 => PriceOutcome::SoldOut,
            _ => PriceOutcome::Failed,
        }
    }

    /// Successful observations reset the circuit breaker.
    pub fn is_success(&self) -> bool {
        !matches!(self, PriceOutcome::Failed)
    }

    pub fn amount(&self) -> Option<f64> {
        match self {
            PriceOutcome::Amount(p) => Some(*p),
            _ => None,
        }
    }
}

const SOLD_OUT: &str = "SOLD_OUT";

impl From<PriceOutcome> for Value {
    fn from(outcome: PriceOutcome) -> Self {
        match outcome {
            PriceOutcome::Amount(p) => serde_json::json!(p),
            PriceOutcome::SoldOut => Value::String(SOLD_OUT.into()),
            PriceOutcome::Failed => Value::Null,
        }
    }
}

impl TryFrom<Value> for PriceOutcome {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(PriceOutcome::Failed),
            Value::Number(n) => Ok(PriceOutcome::from_wire(n.as_f64())),
            Value::String(s) if s == SOLD_OUT => Ok(PriceOutcome::SoldOut),
            other => Err(format!("invalid price: {other}")),
        }
    }
}

/// One reported price (or sold-out / failure sentinel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub hotel_id: String,
    #[serde(default)]
    pub hotel_name: String,
    pub date: NaiveDate,
    pub price: PriceOutcome,
    #[serde(default = "default_kind")]
    pub kind: TaskKind,
    pub observed_at: DateTime<Utc>,
}

fn default_kind() -> TaskKind {
    TaskKind::Today
}

impl Observation {
    pub fn new(task: &Task, price: PriceOutcome, observed_at: DateTime<Utc>) -> Self {
        Self {
            hotel_id: task.hotel_id.clone(),
            hotel_name: task.hotel_name.clone(),
            date: task.target_date,
            price,
            kind: task.kind,
            observed_at,
        }
    }

    /// Dedup key: case/whitespace-insensitive hotel name (or id when unnamed) plus date.
    pub fn dedup_key(&self) -> (String, NaiveDate) {
        let name = self.hotel_name.trim().to_lowercase();
        let identity = if name.is_empty() {
            self.hotel_id.trim().to_lowercase()
        } else {
            name
        };
        (identity, self.date)
    }
}

/// Progress snapshot published to observers and persisted as `batchState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: u64,
    pub is_running: bool,
    pub is_paused: bool,
    pub total: usize,
    /// `min(results.len(), total)`.
    pub current: usize,
    #[serde(default)]
    pub in_flight: usize,
    pub status: String,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub results: Vec<Observation>,
}

/// Task configuration synced from the backend (`taskConfig` key).
/// Every field is optional; absent fields fall back to local config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default, alias = "activeHours", skip_serializing_if = "Option::is_none")]
    pub active_hours: Option<String>,
    #[serde(default, alias = "futureDaysMin", skip_serializing_if = "Option::is_none")]
    pub future_days_min: Option<u32>,
    #[serde(default, alias = "futureScrapeDays", skip_serializing_if = "Option::is_none")]
    pub future_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

/// Scheduler bookkeeping persisted under `schedulerState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub next_hourly: Option<NaiveDateTime>,
    pub next_daily: Option<NaiveDateTime>,
    pub active_hours: Vec<u32>,
    pub min_days_offset: u32,
    pub max_days_offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotel(json: Value) -> Hotel {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_hotel_accepts_loose_backend_shapes() {
        let h = hotel(serde_json::json!({
            "id": 42, "name": "Sea View", "ctrip_url": "", "url": "https://hotels.ctrip.com/hotels/42.html",
            "is_active": "1", "store_id": 7
        }));
        assert_eq!(h.id, "42");
        assert_eq!(h.store_id.as_deref(), Some("7"));
        assert!(h.is_active);
        assert_eq!(h.resolved_url(), Some("https://hotels.ctrip.com/hotels/42.html"));

        let inactive = hotel(serde_json::json!({"id": "a", "is_active": 0}));
        assert!(!inactive.is_active);
        assert_eq!(inactive.resolved_url(), None);

        let absent = hotel(serde_json::json!({"id": "b"}));
        assert!(absent.is_active);
    }

    #[test]
    fn test_active_unique_keeps_first_by_id() {
        let hotels = vec![
            hotel(serde_json::json!({"id": 1, "name": "first"})),
            hotel(serde_json::json!({"id": 1, "name": "dup"})),
            hotel(serde_json::json!({"id": 2, "is_active": false})),
            hotel(serde_json::json!({"id": 3})),
        ];
        let kept = active_unique(&hotels);
        let names: Vec<_> = kept.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(names, vec!["1", "3"]);
        assert_eq!(kept[0].name, "first");
    }

    #[test]
    fn test_price_wire_convention() {
        assert_eq!(PriceOutcome::from_wire(Some(388.0)), PriceOutcome::Amount(388.0));
        assert_eq!(PriceOutcome::from_wire(Some(-1.0)), PriceOutcome::SoldOut);
        assert_eq!(PriceOutcome::from_wire(Some(0.0)), PriceOutcome::Failed);
        assert_eq!(PriceOutcome::from_wire(None), PriceOutcome::Failed);
        assert!(PriceOutcome::SoldOut.is_success());
        assert!(!PriceOutcome::Failed.is_success());
    }

    #[test]
    fn test_price_json_sentinels() {
        assert_eq!(serde_json::to_value(PriceOutcome::SoldOut).unwrap(), "SOLD_OUT");
        assert_eq!(serde_json::to_value(PriceOutcome::Failed).unwrap(), Value::Null);
        let back: PriceOutcome = serde_json::from_value(serde_json::json!(120.5)).unwrap();
        assert_eq!(back, PriceOutcome::Amount(120.5));
        assert!(serde_json::from_value::<PriceOutcome>(serde_json::json!("cheap")).is_err());
    }

    #[test]
    fn test_dedup_key_normalizes_name() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let task = Task {
            hotel_id: "9".into(),
            hotel_name: "  Grand Plaza ".into(),
            target_url: "https://example.com/hotels/9.html".into(),
            kind: TaskKind::Today,
            target_date: date,
        };
        let at = date.and_hms_opt(9, 0, 0).unwrap().and_utc();
        let a = Observation::new(&task, PriceOutcome::Amount(100.0), at);
        let mut other = task.clone();
        other.hotel_name = "grand plaza".into();
        let b = Observation::new(&other, PriceOutcome::Failed, at);
        assert_eq!(a.dedup_key(), b.dedup_key());

        other.hotel_name.clear();
        let c = Observation::new(&other, PriceOutcome::Failed, at);
        assert_eq!(c.dedup_key(), ("9".to_string(), date));
    }
}
