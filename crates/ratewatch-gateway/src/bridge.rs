//! Execution-unit bridge: the browser-side agent serves unit operations over `/ws/units`.
//!
//! Protocol:
//! → Server sends: {"type":"create","request_id":"...","url":"..."}
//! → Server sends: {"type":"destroy","request_id":"...","unit_id":"..."}
//! → Server sends: {"type":"dispatch","request_id":"...","unit_id":"...","command":{...}}
//! → Server sends: {"type":"probe","request_id":"...","unit_id":"..."}
//! ← Agent sends:  {"type":"reply","request_id":"...","ok":true,"unit_id":"...","ready":true}
//! ← Agent sends:  {"type":"price","unit_id":"...","price":512.0}   (or "sold_out":true / "error":"...")

use async_trait::async_trait;
use ratewatch_core::traits::{Readiness, UnitCommand, UnitFactory, UnitId};
use ratewatch_core::{PriceOutcome, RatewatchError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long a single unit operation may wait on the agent.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound frames from the agent.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Reply(AgentReply),
    Price(PriceReport),
    Ping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentReply {
    pub request_id: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A completion message pushed by a unit's content script.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceReport {
    pub unit_id: UnitId,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub sold_out: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl PriceReport {
    pub fn outcome(&self) -> PriceOutcome {
        if self.sold_out {
            PriceOutcome::SoldOut
        } else if self.error.is_some() {
            PriceOutcome::Failed
        } else {
            PriceOutcome::from_wire(self.price)
        }
    }
}

struct AgentLink {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// `UnitFactory` backed by whichever agent is currently connected.
pub struct UnitBridge {
    agent: Mutex<Option<AgentLink>>,
    pending: Mutex<HashMap<String, oneshot::Sender<AgentReply>>>,
    generation: AtomicU64,
    request_timeout: Duration,
}

impl Default for UnitBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitBridge {
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(request_timeout: Duration) -> Self {
        Self {
            agent: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            request_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.agent.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Register a new agent connection. The newest connection wins.
    /// Returns its generation and the frames to write to it.
    pub fn attach(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .agent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(AgentLink { generation, tx });
        if previous.is_some() {
            tracing::warn!("🔌 Unit agent replaced by a newer connection");
        } else {
            tracing::info!("🔌 Unit agent connected");
        }
        (generation, rx)
    }

    /// Drop the connection if it is still the current one; in-flight requests fail.
    pub fn detach(&self, generation: u64) {
        let mut agent = self.agent.lock().unwrap_or_else(|e| e.into_inner());
        if agent.as_ref().map(|a| a.generation) != Some(generation) {
            return;
        }
        *agent = None;
        drop(agent);
        let dropped = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let n = pending.len();
            pending.clear();
            n
        };
        tracing::warn!("🔌 Unit agent disconnected ({dropped} requests abandoned)");
    }

    /// Hand a reply to whoever is waiting on its `request_id`.
    pub fn resolve(&self, reply: AgentReply) {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&reply.request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::debug!("Late reply for request {}, ignoring", reply.request_id),
        }
    }

    fn forget(&self, request_id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }

    async fn request(&self, op: &str, mut frame: serde_json::Value) -> Result<AgentReply> {
        let request_id = uuid::Uuid::new_v4().to_string();
        frame["type"] = serde_json::json!(op);
        frame["request_id"] = serde_json::json!(request_id);

        let sender = self
            .agent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| a.tx.clone())
            .ok_or_else(|| RatewatchError::Unit("no unit agent connected".into()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);
        if sender.send(frame.to_string()).is_err() {
            self.forget(&request_id);
            return Err(RatewatchError::Unit("unit agent went away".into()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) if reply.ok => Ok(reply),
            Ok(Ok(reply)) => Err(RatewatchError::Unit(format!(
                "{op} failed: {}",
                reply.error.unwrap_or_else(|| "unknown error".into())
            ))),
            Ok(Err(_)) => Err(RatewatchError::Unit(format!("agent disconnected during {op}"))),
            Err(_) => {
                self.forget(&request_id);
                Err(RatewatchError::Unit(format!(
                    "{op} timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl UnitFactory for UnitBridge {
    async fn create(&self, url: &str) -> Result<UnitId> {
        let reply = self.request("create", serde_json::json!({ "url": url })).await?;
        reply
            .unit_id
            .map(UnitId)
            .ok_or_else(|| RatewatchError::Unit("create reply without unit_id".into()))
    }

    async fn destroy(&self, unit: &UnitId) -> Result<()> {
        self.request("destroy", serde_json::json!({ "unit_id": unit })).await?;
        Ok(())
    }

    async fn dispatch(&self, unit: &UnitId, command: &UnitCommand) -> Result<()> {
        self.request("dispatch", serde_json::json!({ "unit_id": unit, "command": command }))
            .await?;
        Ok(())
    }

    async fn probe(&self, unit: &UnitId) -> Result<Readiness> {
        let reply = self.request("probe", serde_json::json!({ "unit_id": unit })).await?;
        Ok(if reply.ready { Readiness::Ready } else { Readiness::NotYet })
    }
}
