//! BatchRun: the mutable state of one `load()`-to-drain cycle.

use ratewatch_core::traits::UnitId;
use ratewatch_core::{BatchSnapshot, Observation, Task};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::task::JoinHandle;

/// Pause reason recorded when the circuit breaker trips.
pub const ALL_STRIKE_REASON: &str = "all_strike_login_check";

/// A task that has been handed to a live execution unit.
#[derive(Debug)]
pub struct InFlight {
    pub task: Task,
    /// Per-task timeout timer; aborted on completion.
    pub timeout: Option<JoinHandle<()>>,
}

impl InFlight {
    pub fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }
}

/// State of the current (or last) run.
///
/// Invariants: `in_flight.len() <= concurrency_limit`; once `is_running` is
/// false, `queue` and `in_flight` are both empty.
#[derive(Debug)]
pub struct BatchRun {
    /// Cancellation token. Async callbacks capture it and compare on resume.
    pub batch_id: u64,
    pub queue: VecDeque<Task>,
    pub in_flight: HashMap<UnitId, InFlight>,
    pub concurrency_limit: usize,
    pub is_running: bool,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub results: Vec<Observation>,
    pub consecutive_failures: usize,
    pub total: usize,
    /// Single-admission guard: set from task pop until the unit exists (or failed to).
    pub admitting: bool,
    /// Units whose completion message is being handled.
    pub processing: HashSet<UnitId>,
}

/// What a single outcome did to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerOutcome {
    Reset,
    Counted,
    Tripped,
}

impl BatchRun {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            batch_id: 0,
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            concurrency_limit: concurrency_limit.max(1),
            is_running: false,
            is_paused: false,
            pause_reason: None,
            results: Vec::new(),
            consecutive_failures: 0,
            total: 0,
            admitting: false,
            processing: HashSet::new(),
        }
    }

    /// Start a fresh run. Returns the units left over from the previous one.
    pub fn reset(&mut self, tasks: Vec<Task>, concurrency_limit: usize) -> Vec<UnitId> {
        let orphans = self.drain_in_flight();
        self.batch_id += 1;
        self.total = tasks.len();
        self.queue = tasks.into();
        self.results.clear();
        self.concurrency_limit = concurrency_limit.max(1);
        self.is_running = true;
        self.is_paused = false;
        self.pause_reason = None;
        self.consecutive_failures = 0;
        self.admitting = false;
        self.processing.clear();
        orphans
    }

    /// End the run. Returns the units that must be torn down.
    pub fn halt(&mut self) -> Vec<UnitId> {
        self.batch_id += 1;
        self.is_running = false;
        self.is_paused = false;
        self.queue.clear();
        self.admitting = false;
        self.drain_in_flight()
    }

    fn drain_in_flight(&mut self) -> Vec<UnitId> {
        self.in_flight
            .drain()
            .map(|(unit, mut entry)| {
                entry.cancel_timeout();
                unit
            })
            .collect()
    }

    pub fn has_free_slot(&self) -> bool {
        self.in_flight.len() < self.concurrency_limit
    }

    /// Whether the callback tagged with `batch_id` still belongs to a live run.
    pub fn is_current(&self, batch_id: u64) -> bool {
        self.is_running && self.batch_id == batch_id
    }

    /// Detach a unit from the run, cancelling its timer.
    pub fn take_unit(&mut self, unit: &UnitId) -> Option<Task> {
        self.in_flight.remove(unit).map(|mut entry| {
            entry.cancel_timeout();
            entry.task
        })
    }

    /// Feed one outcome to the circuit breaker.
    pub fn record_outcome(&mut self, success: bool) -> BreakerOutcome {
        if success {
            self.consecutive_failures = 0;
            return BreakerOutcome::Reset;
        }
        self.consecutive_failures += 1;
        if self.all_failed() && !self.is_paused {
            self.is_paused = true;
            self.pause_reason = Some(ALL_STRIKE_REASON.to_string());
            BreakerOutcome::Tripped
        } else {
            BreakerOutcome::Counted
        }
    }

    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.consecutive_failures >= self.total
    }

    /// Pending plus in-flight tasks, for restart recovery.
    pub fn outstanding(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.in_flight.values().map(|e| e.task.clone()).collect();
        tasks.extend(self.queue.iter().cloned());
        tasks
    }

    pub fn status(&self) -> String {
        if !self.is_running {
            return if self.total > 0 { "Completed".into() } else { "Idle".into() };
        }
        if self.is_paused {
            return match self.pause_reason.as_deref() {
                Some(ALL_STRIKE_REASON) => "Paused: every task failed, check login".into(),
                Some(reason) => format!("Paused: {reason}"),
                None => "Paused".into(),
            };
        }
        format!("Processing ({} units)...", self.in_flight.len())
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            batch_id: self.batch_id,
            is_running: self.is_running,
            is_paused: self.is_paused,
            total: self.total,
            current: self.results.len().min(self.total),
            in_flight: self.in_flight.len(),
            status: self.status(),
            pause_reason: self.pause_reason.clone(),
            results: self.results.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ratewatch_core::TaskKind;

    fn task(id: &str) -> Task {
        Task {
            hotel_id: id.into(),
            hotel_name: format!("Hotel {id}"),
            target_url: format!("https://example.com/{id}"),
            kind: TaskKind::Today,
            target_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
        }
    }

    #[test]
    fn test_reset_bumps_batch_and_returns_orphans() {
        let mut run = BatchRun::new(2);
        run.reset(vec![task("a")], 2);
        let first = run.batch_id;
        run.in_flight.insert(UnitId::from("u1"), InFlight { task: task("a"), timeout: None });

        let orphans = run.reset(vec![task("b"), task("c")], 0);
        assert_eq!(orphans, vec![UnitId::from("u1")]);
        assert!(run.batch_id > first);
        assert_eq!(run.total, 2);
        assert_eq!(run.concurrency_limit, 1);
        assert!(run.in_flight.is_empty());
    }

    #[test]
    fn test_breaker_trips_at_total() {
        let mut run = BatchRun::new(1);
        run.reset(vec![task("a"), task("b"), task("c")], 1);
        assert_eq!(run.record_outcome(false), BreakerOutcome::Counted);
        assert_eq!(run.record_outcome(true), BreakerOutcome::Reset);
        assert_eq!(run.record_outcome(false), BreakerOutcome::Counted);
        assert_eq!(run.record_outcome(false), BreakerOutcome::Counted);
        assert_eq!(run.record_outcome(false), BreakerOutcome::Tripped);
        assert!(run.is_paused);
        assert_eq!(run.pause_reason.as_deref(), Some(ALL_STRIKE_REASON));
    }

    #[test]
    fn test_halt_empties_everything() {
        let mut run = BatchRun::new(3);
        run.reset(vec![task("a"), task("b")], 3);
        run.in_flight.insert(UnitId::from("u1"), InFlight { task: task("a"), timeout: None });
        run.admitting = true;
        let units = run.halt();
        assert_eq!(units.len(), 1);
        assert!(!run.is_running);
        assert!(run.queue.is_empty() && run.in_flight.is_empty());
        assert!(!run.admitting);
        assert_eq!(run.status(), "Completed");
    }

    #[test]
    fn test_snapshot_caps_current_at_total() {
        let mut run = BatchRun::new(1);
        run.reset(vec![task("a")], 1);
        let t = task("a");
        let at = t.target_date.and_hms_opt(9, 0, 0).unwrap().and_utc();
        run.results.push(Observation::new(&t, ratewatch_core::PriceOutcome::Amount(10.0), at));
        run.results.push(Observation::new(&t, ratewatch_core::PriceOutcome::Amount(11.0), at));
        let snap = run.snapshot();
        assert_eq!(snap.current, 1);
        assert_eq!(snap.status, "Processing (0 units)...");
    }
}
