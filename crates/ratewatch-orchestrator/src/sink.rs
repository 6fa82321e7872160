//! Result Sink: dedup-aware log of completed observations.
//!
//! An observation is recorded at most once per `(hotel identity, date)`: once
//! in the run's `results`, once at the head of the persisted `recentHistory`.

use ratewatch_core::Observation;
use ratewatch_core::traits::store::keys;
use ratewatch_core::traits::{StateStore, StateStoreExt};
use std::sync::Arc;

pub struct ResultSink {
    store: Arc<dyn StateStore>,
    history_cap: usize,
}

impl ResultSink {
    pub fn new(store: Arc<dyn StateStore>, history_cap: usize) -> Self {
        Self { store, history_cap }
    }

    /// Append `observation` unless its key is already in `results` or in history.
    /// Returns whether it was recorded.
    pub fn record(&self, results: &mut Vec<Observation>, observation: Observation) -> bool {
        let key = observation.dedup_key();
        if results.iter().any(|r| r.dedup_key() == key) {
            tracing::debug!(
                "Duplicate result ignored: {} ({})",
                observation.hotel_name,
                observation.date
            );
            return false;
        }

        let mut history = self.history();
        if history.iter().any(|h| h.dedup_key() == key) {
            tracing::debug!(
                "Result already in history: {} ({})",
                observation.hotel_name,
                observation.date
            );
            return false;
        }

        history.insert(0, observation.clone());
        history.truncate(self.history_cap);
        if let Err(e) = self.store.put(keys::RECENT_HISTORY, &history) {
            tracing::warn!("Failed to persist history: {e}");
        }
        results.push(observation);
        true
    }

    /// Persisted history, newest first.
    pub fn history(&self) -> Vec<Observation> {
        match self.store.get_as::<Vec<Observation>>(keys::RECENT_HISTORY) {
            Ok(history) => history.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to read history: {e}");
                Vec::new()
            }
        }
    }

    pub fn clear_history(&self) {
        if let Err(e) = self.store.remove(keys::RECENT_HISTORY) {
            tracing::warn!("Failed to clear history: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ratewatch_core::{MemoryStore, PriceOutcome, Task, TaskKind};

    fn task(name: &str, day: u32) -> Task {
        Task {
            hotel_id: name.to_lowercase(),
            hotel_name: name.into(),
            target_url: format!("https://example.com/{name}"),
            kind: TaskKind::Future,
            target_date: NaiveDate::from_ymd_opt(2026, 6, day).unwrap(),
        }
    }

    fn observation(task: &Task, price: PriceOutcome) -> Observation {
        Observation::new(task, price, task.target_date.and_hms_opt(9, 0, 0).unwrap().and_utc())
    }

    #[test]
    fn test_same_key_recorded_once() {
        let sink = ResultSink::new(Arc::new(MemoryStore::new()), 50);
        let mut results = Vec::new();
        assert!(sink.record(&mut results, observation(&task("Lakeside", 2), PriceOutcome::Amount(300.0))));
        assert!(!sink.record(&mut results, observation(&task(" LAKESIDE", 2), PriceOutcome::Failed)));
        assert!(sink.record(&mut results, observation(&task("Lakeside", 3), PriceOutcome::SoldOut)));
        assert_eq!(results.len(), 2);
        assert_eq!(sink.history().len(), 2);
    }

    #[test]
    fn test_history_dedups_across_runs() {
        let sink = ResultSink::new(Arc::new(MemoryStore::new()), 50);
        let mut first_run = Vec::new();
        sink.record(&mut first_run, observation(&task("Lakeside", 2), PriceOutcome::Amount(300.0)));

        let mut second_run = Vec::new();
        assert!(!sink.record(&mut second_run, observation(&task("Lakeside", 2), PriceOutcome::Amount(310.0))));
        assert!(second_run.is_empty());

        sink.clear_history();
        assert!(sink.record(&mut second_run, observation(&task("Lakeside", 2), PriceOutcome::Amount(310.0))));
    }

    #[test]
    fn test_history_is_capped_newest_first() {
        let sink = ResultSink::new(Arc::new(MemoryStore::new()), 3);
        let mut results = Vec::new();
        for day in 1..=5 {
            sink.record(&mut results, observation(&task("Lakeside", day), PriceOutcome::Amount(100.0)));
        }
        let days: Vec<u32> = sink.history().iter().map(|o| chrono::Datelike::day(&o.date)).collect();
        assert_eq!(days, vec![5, 4, 3]);
        assert_eq!(results.len(), 5);
    }
}
