//! Precision Scheduler: arms wall-clock alarms and turns wake events into batches.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Timelike};
use ratewatch_core::config::SchedulerConfig;
use ratewatch_core::traits::alarm::{BATCH_KEEPALIVE, DAILY_JOB, HOURLY_JOB};
use ratewatch_core::traits::store::keys;
use ratewatch_core::traits::{AlarmProvider, Clock, StateStore, StateStoreExt};
use ratewatch_core::types::active_unique;
use ratewatch_core::{Hotel, RatewatchError, Result, SchedulerState, Task, TaskConfig, TaskKind};
use ratewatch_orchestrator::Orchestrator;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::anchors;
use crate::tasks::{self, ScheduleWindow};

/// Next fire times, as shown to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerInfo {
    pub next_hourly: Option<NaiveDateTime>,
    pub next_daily: Option<NaiveDateTime>,
    pub total_alarms: usize,
}

/// The scheduler: owns `SchedulerState` and feeds the orchestrator.
pub struct PrecisionScheduler {
    config: SchedulerConfig,
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn StateStore>,
    alarms: Arc<dyn AlarmProvider>,
    clock: Arc<dyn Clock>,
}

impl PrecisionScheduler {
    pub fn new(
        config: SchedulerConfig,
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn StateStore>,
        alarms: Arc<dyn AlarmProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            store,
            alarms,
            clock,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    fn window(&self) -> ScheduleWindow {
        let synced: Option<TaskConfig> = self.store.get_as(keys::TASK_CONFIG).ok().flatten();
        ScheduleWindow::resolve(&self.config, synced.as_ref())
    }

    fn hotels(&self) -> Vec<Hotel> {
        match self.store.get_as::<Vec<Hotel>>(keys::HOTELS) {
            Ok(hotels) => hotels.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to read hotels: {e}");
                Vec::new()
            }
        }
    }

    /// Clear and re-arm the hourly and daily alarms from the current time.
    pub fn arm(&self) -> Result<SchedulerState> {
        let now = self.clock.now();
        let next_hourly = anchors::next_hourly(now);
        let next_daily = anchors::next_daily(now, self.config.daily_hour);

        self.alarms.disarm(HOURLY_JOB)?;
        self.alarms.disarm(DAILY_JOB)?;
        self.alarms.arm(HOURLY_JOB, next_hourly, Some(Duration::minutes(60)))?;
        self.alarms.arm(DAILY_JOB, next_daily, Some(Duration::hours(24)))?;
        tracing::info!("⏰ Next hourly job {next_hourly}, next daily job {next_daily}");

        let window = self.window();
        let state = SchedulerState {
            next_hourly: Some(next_hourly),
            next_daily: Some(next_daily),
            active_hours: window.active_hours,
            min_days_offset: window.min_days,
            max_days_offset: window.max_days,
        };
        if let Err(e) = self.store.put(keys::SCHEDULER_STATE, &state) {
            tracing::warn!("Failed to persist scheduler state: {e}");
        }
        Ok(state)
    }

    /// Dispatch one wake event.
    pub async fn on_alarm(&self, name: &str) {
        tracing::debug!("🔔 Alarm fired: {name} at {}", self.clock.now());
        match name {
            HOURLY_JOB => {
                self.handle_hourly().await;
            }
            DAILY_JOB => {
                self.handle_daily().await;
            }
            BATCH_KEEPALIVE => self.orchestrator.heartbeat(),
            other => tracing::debug!("Unknown alarm '{other}', ignoring"),
        }
    }

    /// Today's prices, if the current hour is active. Returns the number of tasks loaded.
    pub async fn handle_hourly(&self) -> usize {
        let hour = self.clock.now().hour();
        let window = self.window();
        if !window.is_active_hour(hour) {
            tracing::info!("Skipping hourly job: {hour:02}:00 not in active hours");
            return 0;
        }
        let tasks = tasks::today_tasks(&self.hotels(), self.clock.today());
        if tasks.is_empty() {
            tracing::info!("No active hotels for hourly job, skipping");
            return 0;
        }
        tracing::info!("⏰ Hourly job ({hour:02}:00): {} hotels", tasks.len());
        self.run_scheduled(tasks, keys::LAST_TODAY_RUN).await
    }

    /// Future-date prices across the configured window.
    pub async fn handle_daily(&self) -> usize {
        let window = self.window();
        let tasks = tasks::future_tasks(&self.hotels(), self.clock.today(), &window);
        if tasks.is_empty() {
            tracing::warn!("Skipping daily job: no hotels with usable URLs");
            return 0;
        }
        tracing::info!(
            "🗓️ Daily job: {} tasks for days {}..={}",
            tasks.len(),
            window.min_days,
            window.max_days
        );
        self.run_scheduled(tasks, keys::LAST_FUTURE_RUN).await
    }

    async fn run_scheduled(&self, tasks: Vec<Task>, stamp: &str) -> usize {
        let count = tasks.len();
        self.orchestrator.clear_history();
        self.orchestrator.load(tasks).await;
        if let Err(e) = self.store.put(stamp, &self.clock.now()) {
            tracing::warn!("Failed to record {stamp}: {e}");
        }
        count
    }

    /// Operator-initiated batch over the stored hotels. Returns the task count.
    pub async fn start_batch(&self, kind: TaskKind) -> Result<usize> {
        let hotels = self.hotels();
        if hotels.is_empty() {
            return Err(RatewatchError::InvalidArgument("no hotel list found".into()));
        }
        let active = active_unique(&hotels);
        tracing::info!("Batch: {} hotels, {} active and unique", hotels.len(), active.len());
        if active.is_empty() {
            return Err(RatewatchError::InvalidArgument("no active hotels to scrape".into()));
        }

        let today = self.clock.today();
        let tasks = match kind {
            TaskKind::Today => tasks::today_tasks(&active, today),
            TaskKind::Future => tasks::future_tasks(&active, today, &self.window()),
        };
        let count = tasks.len();

        self.orchestrator.stop().await;
        self.orchestrator.clear_history();
        self.orchestrator.load(tasks).await;
        tracing::info!("🚀 Started {kind} batch with {count} tasks");
        Ok(count)
    }

    pub fn scheduler_info(&self) -> SchedulerInfo {
        let armed = self.alarms.armed();
        let find = |name: &str| armed.iter().find(|a| a.name == name).map(|a| a.next_fire);
        SchedulerInfo {
            next_hourly: find(HOURLY_JOB),
            next_daily: find(DAILY_JOB),
            total_alarms: armed.len(),
        }
    }
}

/// Drain wake events until the alarm provider goes away.
pub async fn run_alarm_loop(scheduler: Arc<PrecisionScheduler>, mut wake: mpsc::UnboundedReceiver<String>) {
    tracing::info!("⏰ Scheduler loop started");
    while let Some(name) = wake.recv().await {
        scheduler.on_alarm(&name).await;
    }
    tracing::info!("Scheduler loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use ratewatch_core::traits::{AlarmSpec, FixedClock, Readiness, UnitCommand, UnitFactory, UnitId};
    use ratewatch_core::{MemoryStore, Observation, PriceOutcome, RatewatchConfig};
    use ratewatch_orchestrator::Collaborators;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Units that open but never answer the probe.
    #[derive(Default)]
    struct SilentUnits {
        next: AtomicU64,
    }

    #[async_trait]
    impl UnitFactory for SilentUnits {
        async fn create(&self, _url: &str) -> Result<UnitId> {
            Ok(UnitId(format!("tab-{}", self.next.fetch_add(1, Ordering::SeqCst))))
        }
        async fn destroy(&self, _unit: &UnitId) -> Result<()> {
            Ok(())
        }
        async fn dispatch(&self, _unit: &UnitId, _command: &UnitCommand) -> Result<()> {
            Ok(())
        }
        async fn probe(&self, _unit: &UnitId) -> Result<Readiness> {
            Ok(Readiness::NotYet)
        }
    }

    #[derive(Default)]
    struct MapAlarms {
        armed: Mutex<HashMap<String, AlarmSpec>>,
    }

    impl AlarmProvider for MapAlarms {
        fn arm(&self, name: &str, first_fire: NaiveDateTime, period: Option<Duration>) -> Result<()> {
            let spec = AlarmSpec {
                name: name.into(),
                next_fire: first_fire,
                period,
            };
            self.armed.lock().unwrap().insert(name.into(), spec);
            Ok(())
        }
        fn disarm(&self, name: &str) -> Result<()> {
            self.armed.lock().unwrap().remove(name);
            Ok(())
        }
        fn armed(&self) -> Vec<AlarmSpec> {
            self.armed.lock().unwrap().values().cloned().collect()
        }
    }

    struct Harness {
        scheduler: PrecisionScheduler,
        store: Arc<MemoryStore>,
        alarms: Arc<MapAlarms>,
        clock: Arc<FixedClock>,
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 9, 10).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn harness(now: NaiveDateTime) -> Harness {
        let config = RatewatchConfig::default();
        let store = Arc::new(MemoryStore::new());
        let alarms = Arc::new(MapAlarms::default());
        let clock = Arc::new(FixedClock::new(now));
        let orchestrator = Orchestrator::new(
            &config,
            Collaborators {
                units: Arc::new(SilentUnits::default()),
                store: store.clone(),
                alarms: alarms.clone(),
                clock: clock.clone(),
                reporter: None,
            },
        );
        let scheduler = PrecisionScheduler::new(
            config.scheduler.clone(),
            orchestrator,
            store.clone(),
            alarms.clone(),
            clock.clone(),
        );
        Harness {
            scheduler,
            store,
            alarms,
            clock,
        }
    }

    fn seed_hotels(store: &MemoryStore) {
        store
            .set(
                keys::HOTELS,
                serde_json::json!([
                    {"id": 1, "name": "North", "ctrip_url": "https://hotels.ctrip.com/hotels/1.html"},
                    {"id": 2, "name": "South", "url": "https://hotels.ctrip.com/hotels/2.html?x=1"},
                    {"id": 2, "name": "South dup", "url": "https://hotels.ctrip.com/hotels/2.html"},
                    {"id": 3, "name": "Closed", "url": "https://hotels.ctrip.com/hotels/3.html", "is_active": 0}
                ]),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_arm_sets_both_anchors_and_persists() {
        let h = harness(at(14, 23, 10));
        let state = h.scheduler.arm().unwrap();
        assert_eq!(state.next_hourly, Some(at(15, 0, 0)));
        let tomorrow_five = NaiveDate::from_ymd_opt(2026, 9, 11).unwrap().and_hms_opt(5, 0, 0).unwrap();
        assert_eq!(state.next_daily, Some(tomorrow_five));

        let armed = h.alarms.armed.lock().unwrap().clone();
        assert_eq!(armed[HOURLY_JOB].period, Some(Duration::minutes(60)));
        assert_eq!(armed[DAILY_JOB].period, Some(Duration::hours(24)));

        let persisted: SchedulerState = h.store.get_as(keys::SCHEDULER_STATE).unwrap().unwrap();
        assert_eq!(persisted, state);

        let info = h.scheduler.scheduler_info();
        assert_eq!(info.next_hourly, Some(at(15, 0, 0)));
        assert_eq!(info.total_alarms, 2);
    }

    #[tokio::test]
    async fn test_hourly_respects_active_hours() {
        let h = harness(at(3, 0, 0));
        seed_hotels(&h.store);
        assert_eq!(h.scheduler.handle_hourly().await, 0);
        assert!(!h.scheduler.orchestrator().is_running());

        h.clock.set(at(14, 0, 0));
        assert_eq!(h.scheduler.handle_hourly().await, 2);
        let orch = h.scheduler.orchestrator();
        assert!(orch.is_running());
        assert_eq!(orch.inspect(|run| run.total), 2);
        assert!(h.store.get(keys::LAST_TODAY_RUN).unwrap().is_some());
        assert!(h.alarms.armed.lock().unwrap().contains_key(BATCH_KEEPALIVE));
    }

    #[tokio::test]
    async fn test_daily_builds_future_window() {
        let h = harness(at(5, 0, 0));
        seed_hotels(&h.store);
        h.store
            .set(keys::TASK_CONFIG, serde_json::json!({"futureDaysMin": 1, "futureScrapeDays": 3}))
            .unwrap();

        assert_eq!(h.scheduler.handle_daily().await, 6);
        let queued_dates = h.scheduler.orchestrator().inspect(|run| {
            run.outstanding()
                .iter()
                .filter(|t| t.hotel_id == "2")
                .map(|t| t.target_date.to_string())
                .collect::<Vec<_>>()
        });
        assert_eq!(queued_dates.len(), 3);
        for date in ["2026-09-11", "2026-09-12", "2026-09-13"] {
            assert!(queued_dates.iter().any(|d| d == date));
        }
        assert!(h.store.get(keys::LAST_FUTURE_RUN).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_batch_requires_hotels() {
        let h = harness(at(10, 0, 0));
        let err = h.scheduler.start_batch(TaskKind::Today).await.unwrap_err();
        assert!(matches!(err, RatewatchError::InvalidArgument(_)));

        h.store
            .set(keys::HOTELS, serde_json::json!([{"id": 1, "is_active": false}]))
            .unwrap();
        let err = h.scheduler.start_batch(TaskKind::Today).await.unwrap_err();
        assert!(matches!(err, RatewatchError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_start_batch_clears_history_and_loads() {
        let h = harness(at(10, 0, 0));
        seed_hotels(&h.store);
        let task = Task {
            hotel_id: "1".into(),
            hotel_name: "North".into(),
            target_url: "https://hotels.ctrip.com/hotels/1.html".into(),
            kind: TaskKind::Today,
            target_date: h.clock.today(),
        };
        h.store
            .put(keys::RECENT_HISTORY, &vec![Observation::new(&task, PriceOutcome::Amount(80.0), h.clock.now_utc())])
            .unwrap();

        assert_eq!(h.scheduler.start_batch(TaskKind::Today).await.unwrap(), 2);
        assert!(h.scheduler.orchestrator().history().is_empty());
        assert!(h.scheduler.orchestrator().is_running());

        assert_eq!(h.scheduler.start_batch(TaskKind::Future).await.unwrap(), 14);
        assert_eq!(h.scheduler.orchestrator().inspect(|run| run.total), 14);
    }

    #[tokio::test]
    async fn test_keepalive_alarm_routes_to_heartbeat() {
        let h = harness(at(10, 0, 0));
        h.alarms.arm(BATCH_KEEPALIVE, at(10, 0, 30), Some(Duration::seconds(30))).unwrap();
        h.scheduler.on_alarm(BATCH_KEEPALIVE).await;
        assert!(!h.alarms.armed.lock().unwrap().contains_key(BATCH_KEEPALIVE));
    }

    #[tokio::test]
    async fn test_alarm_loop_drains_channel() {
        let h = harness(at(14, 0, 0));
        seed_hotels(&h.store);
        let scheduler = Arc::new(h.scheduler);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(HOURLY_JOB.to_string()).unwrap();
        drop(tx);
        run_alarm_loop(scheduler.clone(), rx).await;
        assert_eq!(scheduler.orchestrator().inspect(|run| run.total), 2);
    }
}
