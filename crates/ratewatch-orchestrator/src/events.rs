//! Progress events pushed to observers.

use ratewatch_core::BatchSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Emitted after every state-mutating operation.
    BatchUpdate(BatchSnapshot),
    /// A run ended with every task failing; the operator probably needs to log in again.
    AuthenticationSuspected { login_url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(BatchEvent::AuthenticationSuspected {
            login_url: "https://example.com/login".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "authentication_suspected");
        assert_eq!(json["payload"]["login_url"], "https://example.com/login");

        let json = serde_json::to_value(BatchEvent::BatchUpdate(BatchSnapshot::default())).unwrap();
        assert_eq!(json["type"], "batch_update");
        assert_eq!(json["payload"]["isRunning"], false);
    }
}
