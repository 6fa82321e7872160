//! WebSocket handlers.
//!
//! - `/ws/progress`: every `BatchEvent` as JSON, starting with the current snapshot.
//! - `/ws/units`: the execution-unit agent (see `bridge` for the frame protocol).

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use ratewatch_orchestrator::BatchEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::bridge::AgentMessage;
use super::server::AppState;

pub async fn progress_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_progress(socket, state))
}

pub async fn units_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_agent(socket, state))
}

async fn stream_progress(socket: WebSocket, state: Arc<AppState>) {
    tracing::debug!("Progress observer connected");
    let mut events = state.orchestrator.subscribe();
    let (mut sink, mut stream) = socket.split();

    let hello = BatchEvent::BatchUpdate(state.orchestrator.get_state());
    if sink.send(event_frame(&hello)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Progress observer lagged by {skipped} events, resyncing");
                        BatchEvent::BatchUpdate(state.orchestrator.get_state())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if sink.send(event_frame(&event)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Progress observer disconnected");
}

fn event_frame(event: &BatchEvent) -> Message {
    let text = serde_json::to_string(event).unwrap_or_else(|e| {
        serde_json::json!({"type": "error", "message": e.to_string()}).to_string()
    });
    Message::Text(text.into())
}

async fn serve_agent(socket: WebSocket, state: Arc<AppState>) {
    let (generation, mut outbound) = state.bridge.attach();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                tracing::error!("WS send to unit agent failed: {e}");
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_agent_frame(&state, text.as_str()),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    writer.abort();
    state.bridge.detach(generation);
}

/// Route one agent frame: replies to the bridge, prices to the orchestrator.
pub(crate) fn handle_agent_frame(state: &Arc<AppState>, text: &str) {
    match serde_json::from_str::<AgentMessage>(text) {
        Ok(AgentMessage::Reply(reply)) => state.bridge.resolve(reply),
        Ok(AgentMessage::Price(report)) => {
            let orchestrator = Arc::clone(&state.orchestrator);
            tokio::spawn(async move {
                orchestrator.submit(&report.unit_id, report.outcome()).await;
            });
        }
        Ok(AgentMessage::Ping) => {}
        Err(e) => tracing::warn!("Unreadable frame from unit agent: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::AgentReply;
    use crate::routes::tests::test_state;
    use chrono::NaiveDate;
    use ratewatch_core::traits::UnitFactory;
    use ratewatch_core::{PriceOutcome, Task, TaskKind};

    #[test]
    fn test_event_frame_shape() {
        let frame = event_frame(&BatchEvent::AuthenticationSuspected {
            login_url: "https://login.example/".into(),
        });
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["type"], "authentication_suspected");
        assert_eq!(json["payload"]["login_url"], "https://login.example/");
    }

    #[tokio::test]
    async fn test_reply_frame_resolves_bridge_request() {
        let (state, _) = test_state();
        let (_generation, mut outbound) = state.bridge.attach();
        let bridge = state.bridge.clone();
        let pending = tokio::spawn(async move { bridge.create("https://x.example/1.html").await });

        let frame: serde_json::Value = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        let reply = serde_json::json!({
            "type": "reply",
            "request_id": frame["request_id"],
            "ok": true,
            "unit_id": "tab-42",
        });
        handle_agent_frame(&state, &reply.to_string());
        assert_eq!(pending.await.unwrap().unwrap().0, "tab-42");

        // Garbage and pings are tolerated.
        handle_agent_frame(&state, "not json");
        handle_agent_frame(&state, r#"{"type":"ping"}"#);
    }

    #[tokio::test]
    async fn test_price_frame_reaches_orchestrator() {
        let (state, _) = test_state();
        let (_generation, mut outbound) = state.bridge.attach();

        // Plays the agent: every unit opens, is ready at once and accepts the command.
        let bridge = state.bridge.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
                bridge.resolve(AgentReply {
                    request_id: frame["request_id"].as_str().unwrap().into(),
                    ok: true,
                    unit_id: Some("tab-1".into()),
                    ready: true,
                    error: None,
                });
            }
        });

        let task = Task {
            hotel_id: "5".into(),
            hotel_name: "Harbour".into(),
            target_url: "https://x.example/5.html".into(),
            kind: TaskKind::Today,
            target_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        };
        state.orchestrator.load(vec![task]).await;
        while state.orchestrator.inspect(|run| run.in_flight.is_empty()) {
            tokio::task::yield_now().await;
        }

        handle_agent_frame(&state, r#"{"type":"price","unit_id":"tab-1","price":640.0}"#);
        while state.orchestrator.is_running() {
            tokio::task::yield_now().await;
        }
        let snapshot = state.orchestrator.get_state();
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].price, PriceOutcome::Amount(640.0));
    }
}
