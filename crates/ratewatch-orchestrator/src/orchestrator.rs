//! Batch Task Orchestrator: admission loop, unit lifecycle, circuit breaker.
//!
//! All state lives in one [`BatchRun`] behind a mutex that is never held
//! across an await. Every async continuation (unit created, handshake done,
//! timeout fired) carries the `batch_id` it was started under and drops its
//! effect, tearing down any unit it holds, when that id is no longer live.

use ratewatch_core::config::OrchestratorConfig;
use ratewatch_core::traits::alarm::BATCH_KEEPALIVE;
use ratewatch_core::traits::store::keys;
use ratewatch_core::traits::{
    AlarmProvider, Clock, Readiness, Reporter, StateStore, StateStoreExt, UnitCommand,
    UnitFactory, UnitId,
};
use ratewatch_core::{
    BatchSnapshot, Hotel, Observation, PriceOutcome, RatewatchConfig, Task, TaskConfig,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::events::BatchEvent;
use crate::run::{ALL_STRIKE_REASON, BatchRun, BreakerOutcome, InFlight};
use crate::sink::ResultSink;

/// External collaborators, injected so tests can swap in fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub units: Arc<dyn UnitFactory>,
    pub store: Arc<dyn StateStore>,
    pub alarms: Arc<dyn AlarmProvider>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Option<Arc<dyn Reporter>>,
}

enum Handshake {
    Ready,
    TimedOut,
    /// The unit left the run while we were polling.
    Abandoned,
}

pub struct Orchestrator {
    settings: OrchestratorConfig,
    keepalive: chrono::Duration,
    fallback_login_url: String,
    deps: Collaborators,
    sink: ResultSink,
    events: broadcast::Sender<BatchEvent>,
    run: Mutex<BatchRun>,
}

impl Orchestrator {
    pub fn new(config: &RatewatchConfig, deps: Collaborators) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let keepalive_secs = config.scheduler.keepalive_secs.max(1) as i64;
        Arc::new(Self {
            settings: config.orchestrator.clone(),
            keepalive: chrono::Duration::seconds(keepalive_secs),
            fallback_login_url: config.backend.login_url.clone(),
            sink: ResultSink::new(deps.store.clone(), config.orchestrator.history_cap),
            run: Mutex::new(BatchRun::new(config.orchestrator.concurrency)),
            events,
            deps,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BatchRun> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read-only access to the live run.
    pub fn inspect<R>(&self, f: impl FnOnce(&BatchRun) -> R) -> R {
        f(&self.lock())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    pub fn get_state(&self) -> BatchSnapshot {
        self.lock().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    pub fn history(&self) -> Vec<Observation> {
        self.sink.history()
    }

    pub fn clear_history(&self) {
        self.sink.clear_history();
    }

    /// Worker count: the synced `taskConfig` wins over local config.
    fn configured_concurrency(&self) -> usize {
        let synced = self
            .deps
            .store
            .get_as::<TaskConfig>(keys::TASK_CONFIG)
            .ok()
            .flatten()
            .and_then(|c| c.concurrency);
        synced.unwrap_or(self.settings.concurrency).max(1)
    }

    // ── Run lifecycle ───────────────────────────────────────

    /// Start a new run over `tasks`. An empty list is a no-op.
    pub async fn load(self: &Arc<Self>, tasks: Vec<Task>) {
        if tasks.is_empty() {
            tracing::debug!("load() called with no tasks, ignoring");
            return;
        }
        let limit = self.configured_concurrency();
        let (orphans, batch_id, total) = {
            let mut run = self.lock();
            let orphans = run.reset(tasks, limit);
            (orphans, run.batch_id, run.total)
        };
        tracing::info!("📦 Loaded batch #{batch_id}: {total} tasks, concurrency {limit}");

        if let Err(e) = self.deps.store.remove(keys::PAUSE_REASON) {
            tracing::warn!("Failed to clear pause reason: {e}");
        }
        self.arm_keepalive();
        for unit in orphans {
            self.destroy(&unit).await;
        }
        self.process();
        self.broadcast_state();
    }

    /// Admission loop. Safe to call at any time; admits at most one task per call.
    pub fn process(self: &Arc<Self>) {
        let mut run = self.lock();
        if !run.is_running || run.is_paused {
            return;
        }
        if !run.has_free_slot() {
            tracing::debug!(
                "Concurrency full ({}/{}), waiting",
                run.in_flight.len(),
                run.concurrency_limit
            );
            return;
        }
        if run.admitting {
            tracing::debug!("Admission already in progress");
            return;
        }

        let task = loop {
            match run.queue.pop_front() {
                None => {
                    if run.in_flight.is_empty() {
                        drop(run);
                        tracing::info!("✅ All tasks processed");
                        let leftovers = self.halt();
                        self.spawn_teardown(leftovers);
                    } else {
                        tracing::debug!("Queue empty, waiting on {} units", run.in_flight.len());
                    }
                    return;
                }
                Some(task) if task.target_url.trim().is_empty() => {
                    tracing::warn!("❌ No URL for {}, skipping", task.hotel_id);
                }
                Some(task) => break task,
            }
        };

        run.admitting = true;
        let batch_id = run.batch_id;
        let refill = run.in_flight.len() + 1 < run.concurrency_limit && !run.queue.is_empty();
        drop(run);

        tracing::debug!("🚀 Opening unit for {} (batch #{batch_id})", task.hotel_name);
        tokio::spawn(Arc::clone(self).launch(task, batch_id));

        if refill {
            let this = Arc::clone(self);
            let delay = Duration::from_millis(self.settings.refill_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.process();
            });
        }
    }

    /// Create a unit for `task`, register it, wait for readiness, dispatch.
    async fn launch(self: Arc<Self>, task: Task, batch_id: u64) {
        let created = self.deps.units.create(&task.target_url).await;

        let unit = match created {
            Ok(unit) => unit,
            Err(e) => {
                tracing::warn!("❌ Unit creation failed for {}: {e}", task.hotel_name);
                let outcome = {
                    let mut run = self.lock();
                    if run.batch_id == batch_id {
                        run.admitting = false;
                    }
                    run.is_current(batch_id).then(|| run.record_outcome(false))
                };
                if let Some(outcome) = outcome {
                    self.after_failure(outcome);
                    self.process();
                }
                return;
            }
        };

        let registered = {
            let mut run = self.lock();
            if run.batch_id == batch_id {
                run.admitting = false;
            }
            if run.is_current(batch_id) {
                let timeout = self.spawn_timeout(unit.clone(), batch_id);
                run.in_flight.insert(
                    unit.clone(),
                    InFlight {
                        task: task.clone(),
                        timeout: Some(timeout),
                    },
                );
                true
            } else {
                false
            }
        };
        if !registered {
            tracing::warn!("⚠️ Batch #{batch_id} is gone, closing new unit {unit}");
            self.destroy(&unit).await;
            return;
        }

        tracing::debug!("Unit {unit} opened for {}", task.hotel_name);
        self.broadcast_state();
        self.process();

        match self.handshake(&unit, batch_id).await {
            Handshake::Ready => {}
            Handshake::Abandoned => return,
            Handshake::TimedOut => {
                self.abandon(&unit, batch_id, "handshake timed out").await;
                return;
            }
        }

        if !self.is_live(&unit, batch_id) {
            return;
        }
        let command = UnitCommand::for_task(&task, self.deps.clock.today());
        match self.deps.units.dispatch(&unit, &command).await {
            Ok(()) => tracing::debug!(
                "📨 Dispatched {:?} to {unit} ({} {})",
                command.command,
                task.hotel_name,
                task.target_date
            ),
            Err(e) => self.abandon(&unit, batch_id, &format!("dispatch failed: {e}")).await,
        }
    }

    /// Poll the unit until it answers, the handshake window closes, or it leaves the run.
    async fn handshake(&self, unit: &UnitId, batch_id: u64) -> Handshake {
        let deadline = Instant::now() + Duration::from_secs(self.settings.handshake_timeout_secs);
        let interval = Duration::from_millis(self.settings.probe_interval_ms.max(1));
        loop {
            tokio::time::sleep(interval).await;
            if !self.is_live(unit, batch_id) {
                return Handshake::Abandoned;
            }
            match self.deps.units.probe(unit).await {
                Ok(Readiness::Ready) => return Handshake::Ready,
                Ok(Readiness::NotYet) => {}
                Err(e) => tracing::trace!("Probe {unit}: {e}"),
            }
            if Instant::now() >= deadline {
                return Handshake::TimedOut;
            }
        }
    }

    fn spawn_timeout(self: &Arc<Self>, unit: UnitId, batch_id: u64) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let after = Duration::from_secs(self.settings.task_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            {
                // Detach our own handle so abandon() doesn't abort this task.
                let mut run = this.lock();
                if let Some(entry) = run.in_flight.get_mut(&unit) {
                    entry.timeout = None;
                }
            }
            this.abandon(&unit, batch_id, "timed out").await;
        })
    }

    fn is_live(&self, unit: &UnitId, batch_id: u64) -> bool {
        let run = self.lock();
        run.is_current(batch_id) && run.in_flight.contains_key(unit)
    }

    /// Drop a unit that will never complete: counts as a failed outcome.
    async fn abandon(self: &Arc<Self>, unit: &UnitId, batch_id: u64, reason: &str) {
        let abandoned = {
            let mut run = self.lock();
            if run.batch_id != batch_id {
                None
            } else {
                match run.take_unit(unit) {
                    Some(task) => Some((task, run.record_outcome(false))),
                    None => None,
                }
            }
        };
        let Some((task, outcome)) = abandoned else {
            return;
        };

        tracing::warn!("🛑 {} ({}) {reason}", task.hotel_name, task.target_date);
        self.after_failure(outcome);
        self.destroy(unit).await;
        self.process();
    }

    fn after_failure(&self, outcome: BreakerOutcome) {
        if outcome == BreakerOutcome::Tripped {
            self.on_breaker_tripped();
        }
        self.broadcast_state();
    }

    fn on_breaker_tripped(&self) {
        tracing::warn!("🚨 Every task so far has failed, pausing batch (check login)");
        if let Err(e) = self.deps.store.put(keys::PAUSE_REASON, ALL_STRIKE_REASON) {
            tracing::warn!("Failed to persist pause reason: {e}");
        }
    }

    // ── Completion ──────────────────────────────────────────

    /// Record a unit's outcome. Returns the observation if it was newly recorded.
    ///
    /// Unknown units (stale or duplicate callbacks) only release their processing lock.
    pub async fn complete_task(
        self: &Arc<Self>,
        unit: &UnitId,
        outcome: PriceOutcome,
    ) -> Option<Observation> {
        let completed = {
            let mut run = self.lock();
            match run.take_unit(unit) {
                None => {
                    run.processing.remove(unit);
                    None
                }
                Some(task) => {
                    let observation = Observation::new(&task, outcome, self.deps.clock.now_utc());
                    let recorded = self.sink.record(&mut run.results, observation.clone());
                    let breaker = run.record_outcome(outcome.is_success());
                    Some((observation, recorded, breaker))
                }
            }
        };
        let Some((observation, recorded, breaker)) = completed else {
            tracing::warn!("Completion from unit {unit} not in flight, ignoring");
            return None;
        };

        tracing::info!(
            "✅ {} ({}): {:?}",
            observation.hotel_name,
            observation.date,
            observation.price
        );
        if breaker == BreakerOutcome::Tripped {
            self.on_breaker_tripped();
        }
        self.broadcast_state();

        self.destroy(unit).await;
        self.lock().processing.remove(unit);
        tracing::debug!("Unit {unit} closed, lock released");

        self.process();
        recorded.then_some(observation)
    }

    /// Entry point for inbound completion messages.
    ///
    /// A second message from a unit whose first is still being handled is
    /// rejected. Newly recorded observations are reported upstream; report
    /// failures are logged only.
    pub async fn submit(self: &Arc<Self>, unit: &UnitId, outcome: PriceOutcome) -> Option<Observation> {
        let fresh = self.lock().processing.insert(unit.clone());
        if !fresh {
            tracing::warn!("⚠️ Unit {unit} already submitting, duplicate ignored");
            return None;
        }
        let observation = self.complete_task(unit, outcome).await?;

        if let Some(reporter) = &self.deps.reporter {
            match reporter.report(&observation).await {
                Ok(ack) if ack.success => {
                    tracing::debug!("📤 Reported {} ({})", observation.hotel_name, observation.date)
                }
                Ok(ack) => tracing::warn!(
                    "Report rejected for {}: {}",
                    observation.hotel_name,
                    ack.error.unwrap_or_default()
                ),
                Err(e) => tracing::warn!("Report failed for {}: {e}", observation.hotel_name),
            }
        }
        Some(observation)
    }

    // ── Operator commands ───────────────────────────────────

    pub fn pause(&self) {
        {
            let mut run = self.lock();
            if !run.is_running {
                return;
            }
            run.is_paused = true;
        }
        tracing::info!("⏸️ Batch paused");
        self.broadcast_state();
    }

    pub fn resume(self: &Arc<Self>) {
        {
            let mut run = self.lock();
            if !run.is_running {
                return;
            }
            run.is_paused = false;
            run.pause_reason = None;
        }
        if let Err(e) = self.deps.store.remove(keys::PAUSE_REASON) {
            tracing::warn!("Failed to clear pause reason: {e}");
        }
        tracing::info!("▶️ Batch resumed");
        self.process();
        self.broadcast_state();
    }

    /// End the run and close every outstanding unit.
    pub async fn stop(&self) {
        for unit in self.halt() {
            self.destroy(&unit).await;
        }
    }

    /// Synchronous part of stop: state transition, keepalive, final broadcast.
    fn halt(&self) -> Vec<UnitId> {
        let (units, was_running, all_failed, failures, total) = {
            let mut run = self.lock();
            let was_running = run.is_running;
            let units = run.halt();
            (units, was_running, run.all_failed(), run.consecutive_failures, run.total)
        };
        self.disarm_keepalive();
        self.broadcast_state();

        if was_running && all_failed {
            let login_url = self.login_url_hint();
            tracing::warn!("🚨 All {failures}/{total} tasks failed, probably logged out: {login_url}");
            let _ = self.events.send(BatchEvent::AuthenticationSuspected { login_url });
        }
        units
    }

    fn spawn_teardown(self: &Arc<Self>, units: Vec<UnitId>) {
        if units.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            for unit in units {
                this.destroy(&unit).await;
            }
        });
    }

    /// The operator's own hotel page if known, else the configured login page.
    fn login_url_hint(&self) -> String {
        self.deps
            .store
            .get_as::<Vec<Hotel>>(keys::HOTELS)
            .ok()
            .flatten()
            .and_then(|hotels| {
                hotels
                    .iter()
                    .find(|h| h.is_self())
                    .and_then(|h| h.resolved_url().map(str::to_string))
            })
            .unwrap_or_else(|| self.fallback_login_url.clone())
    }

    async fn destroy(&self, unit: &UnitId) {
        if let Err(e) = self.deps.units.destroy(unit).await {
            tracing::debug!("Destroy {unit}: {e}");
        }
    }

    // ── Keepalive & recovery ────────────────────────────────

    fn arm_keepalive(&self) {
        let first = self.deps.clock.now() + self.keepalive;
        if let Err(e) = self.deps.alarms.arm(BATCH_KEEPALIVE, first, Some(self.keepalive)) {
            tracing::warn!("Failed to arm keepalive: {e}");
        }
    }

    fn disarm_keepalive(&self) {
        if let Err(e) = self.deps.alarms.disarm(BATCH_KEEPALIVE) {
            tracing::warn!("Failed to disarm keepalive: {e}");
        }
    }

    /// Keepalive tick: restart a stalled pipeline, otherwise refresh observers.
    pub fn heartbeat(self: &Arc<Self>) {
        let (running, stalled) = {
            let run = self.lock();
            let idle = run.in_flight.is_empty() && run.processing.is_empty() && !run.admitting;
            (run.is_running, idle && !run.is_paused)
        };
        if !running {
            self.disarm_keepalive();
            return;
        }
        if stalled {
            tracing::warn!("💓 Batch stalled, restarting admission");
            self.process();
        }
        self.broadcast_state();
    }

    /// Restore a run that was in progress when the process last exited.
    ///
    /// Tasks that were in flight are re-queued. Admission is left to the
    /// keepalive heartbeat.
    pub fn hydrate(&self) -> bool {
        let snapshot = match self.deps.store.get_as::<BatchSnapshot>(keys::BATCH_STATE) {
            Ok(Some(s)) if s.is_running => s,
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!("Hydration failed: {e}");
                return false;
            }
        };
        let queue: Vec<Task> = self
            .deps
            .store
            .get_as(keys::BATCH_QUEUE)
            .ok()
            .flatten()
            .unwrap_or_default();
        if queue.is_empty() {
            return false;
        }

        let limit = self.configured_concurrency();
        let (batch_id, pending) = {
            let mut run = self.lock();
            run.reset(queue, limit);
            run.batch_id = run.batch_id.max(snapshot.batch_id) + 1;
            run.total = snapshot.total.max(run.queue.len());
            run.results = snapshot.results;
            run.is_paused = snapshot.is_paused;
            run.pause_reason = snapshot.pause_reason;
            (run.batch_id, run.queue.len())
        };
        tracing::info!("♻️ Restored batch #{batch_id} with {pending} pending tasks");
        self.arm_keepalive();
        self.broadcast_state();
        true
    }

    /// Persist the snapshot and outstanding tasks, then notify observers.
    pub fn broadcast_state(&self) {
        let (snapshot, outstanding) = {
            let run = self.lock();
            (run.snapshot(), run.outstanding())
        };
        if let Err(e) = self.deps.store.put(keys::BATCH_STATE, &snapshot) {
            tracing::warn!("Failed to persist batch state: {e}");
        }
        if let Err(e) = self.deps.store.put(keys::BATCH_QUEUE, &outstanding) {
            tracing::warn!("Failed to persist batch queue: {e}");
        }
        // No subscribers is fine.
        let _ = self.events.send(BatchEvent::BatchUpdate(snapshot));
    }
}
