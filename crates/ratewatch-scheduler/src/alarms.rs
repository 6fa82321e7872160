//! Tokio-backed alarm provider.
//!
//! Each armed alarm is one sleeping task; firing sends the alarm name down an
//! mpsc channel that the scheduler loop drains. Waits are measured against the
//! injected wall clock and re-read at least once a minute, so a suspended host
//! or a stepped clock still fires on the wall-clock boundary.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use ratewatch_core::traits::{AlarmProvider, AlarmSpec, Clock};
use ratewatch_core::{RatewatchError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Armed {
    spec: AlarmSpec,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Longest stretch slept without re-reading the wall clock.
const RECHECK: Duration = Duration::from_secs(60);

type ArmedMap = Arc<Mutex<HashMap<String, Armed>>>;

fn lock(map: &ArmedMap) -> std::sync::MutexGuard<'_, HashMap<String, Armed>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sleep until the wall clock reaches `at`. Returns at once if it already has.
async fn sleep_until_wall(clock: &dyn Clock, at: NaiveDateTime) {
    loop {
        let Ok(remaining) = (at - clock.now()).to_std() else {
            return;
        };
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining.min(RECHECK)).await;
    }
}

pub struct TokioAlarms {
    clock: Arc<dyn Clock>,
    wake: mpsc::UnboundedSender<String>,
    armed: ArmedMap,
    generation: Mutex<u64>,
}

impl TokioAlarms {
    /// Returns the provider and the receiving end of its wake events.
    pub fn new(clock: Arc<dyn Clock>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (wake, rx) = mpsc::unbounded_channel();
        let alarms = Arc::new(Self {
            clock,
            wake,
            armed: Arc::new(Mutex::new(HashMap::new())),
            generation: Mutex::new(0),
        });
        (alarms, rx)
    }

    fn next_generation(&self) -> u64 {
        let mut g = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *g += 1;
        *g
    }
}

impl AlarmProvider for TokioAlarms {
    fn arm(&self, name: &str, first_fire: NaiveDateTime, period: Option<ChronoDuration>) -> Result<()> {
        let every = match period {
            Some(p) => match p.to_std() {
                Ok(d) if !d.is_zero() => Some(p),
                _ => {
                    return Err(RatewatchError::InvalidArgument(format!(
                        "alarm '{name}' needs a positive period"
                    )));
                }
            },
            None => None,
        };
        let generation = self.next_generation();

        let clock = Arc::clone(&self.clock);
        let tx = self.wake.clone();
        let armed = Arc::clone(&self.armed);
        let alarm = name.to_string();
        // Held until the entry is in place, so an immediate fire sees it.
        let mut map = lock(&self.armed);
        let handle = tokio::spawn(async move {
            let mut next = first_fire;
            loop {
                sleep_until_wall(clock.as_ref(), next).await;
                if tx.send(alarm.clone()).is_err() {
                    return;
                }
                let Some(period) = every else {
                    let mut map = lock(&armed);
                    if map.get(&alarm).map(|a| a.generation) == Some(generation) {
                        map.remove(&alarm);
                    }
                    return;
                };
                // Skip boundaries the wall clock has already passed.
                let now = clock.now();
                next += period;
                while next <= now {
                    next += period;
                }
                if let Some(entry) = lock(&armed).get_mut(&alarm) {
                    if entry.generation == generation {
                        entry.spec.next_fire = next;
                    }
                }
            }
        });

        let spec = AlarmSpec {
            name: name.to_string(),
            next_fire: first_fire,
            period,
        };
        tracing::debug!("⏰ Alarm '{name}' armed for {first_fire}");
        if let Some(previous) = map.insert(
            name.to_string(),
            Armed {
                spec,
                generation,
                handle,
            },
        ) {
            previous.handle.abort();
        }
        Ok(())
    }

    fn disarm(&self, name: &str) -> Result<()> {
        if let Some(previous) = lock(&self.armed).remove(name) {
            previous.handle.abort();
            tracing::debug!("Alarm '{name}' cleared");
        }
        Ok(())
    }

    fn armed(&self) -> Vec<AlarmSpec> {
        let mut specs: Vec<AlarmSpec> = lock(&self.armed).values().map(|a| a.spec.clone()).collect();
        specs.sort_by(|a, b| a.next_fire.cmp(&b.next_fire));
        specs
    }
}
