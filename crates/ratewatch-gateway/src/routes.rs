//! API route handlers for the gateway.

use axum::{Json, extract::State};
use ratewatch_core::{Task, TaskKind};
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub kind: TaskKind,
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ratewatch-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "agent_connected": state.bridge.is_connected(),
    }))
}

/// Current batch snapshot.
pub async fn batch_state(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.orchestrator.get_state()))
}

/// Build today/future tasks from the stored hotels and start a fresh batch.
pub async fn batch_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartRequest>,
) -> Json<serde_json::Value> {
    match state.scheduler.start_batch(body.kind).await {
        Ok(count) => Json(serde_json::json!({"ok": true, "kind": body.kind, "count": count})),
        Err(e) => {
            tracing::warn!("Batch start refused: {e}");
            Json(serde_json::json!({"ok": false, "error": e.to_string()}))
        }
    }
}

/// Load an explicit task list, superseding any current run.
pub async fn batch_load(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadRequest>,
) -> Json<serde_json::Value> {
    let count = body.tasks.len();
    state.orchestrator.load(body.tasks).await;
    Json(serde_json::json!({"ok": true, "count": count}))
}

pub async fn batch_pause(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.orchestrator.pause();
    Json(serde_json::json!({"ok": true, "state": state.orchestrator.get_state()}))
}

pub async fn batch_resume(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.orchestrator.resume();
    Json(serde_json::json!({"ok": true, "state": state.orchestrator.get_state()}))
}

pub async fn batch_stop(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.orchestrator.stop().await;
    Json(serde_json::json!({"ok": true, "state": state.orchestrator.get_state()}))
}

/// Next alarm anchors.
pub async fn scheduler_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.scheduler.scheduler_info()))
}
