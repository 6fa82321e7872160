//! Price dispatch: reports each recorded observation to the backend over HTTP.

use async_trait::async_trait;
use ratewatch_core::config::BackendConfig;
use ratewatch_core::traits::store::keys;
use ratewatch_core::traits::{ReportAck, Reporter, StateStore, StateStoreExt};
use ratewatch_core::{Hotel, Observation, PriceOutcome, RatewatchError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Identical uploads inside this window are suppressed.
const UPLOAD_DEDUP_WINDOW: Duration = Duration::from_secs(15);

/// Wire price for sold-out rooms.
const SOLD_OUT_PRICE: f64 = -1.0;

/// `POST {api_base_url}/api/plugin/prices`.
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: String,
    default_store_id: String,
    timeout: Duration,
    store: Option<Arc<dyn StateStore>>,
    recent: Mutex<HashMap<String, Instant>>,
}

impl HttpReporter {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/plugin/prices", config.api_base_url.trim_end_matches('/')),
            default_store_id: config.store_id.clone(),
            timeout: Duration::from_secs(config.report_timeout_secs),
            store: None,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Route per-hotel `store_id`s from the stored hotel list.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn store_id_for(&self, hotel_id: &str) -> String {
        self.store
            .as_ref()
            .and_then(|s| s.get_as::<Vec<Hotel>>(keys::HOTELS).ok().flatten())
            .and_then(|hotels| hotels.into_iter().find(|h| h.id == hotel_id))
            .and_then(|h| h.store_id)
            .unwrap_or_else(|| self.default_store_id.clone())
    }

    /// JSON body for one observation.
    pub fn payload(&self, observation: &Observation) -> serde_json::Value {
        let (price, error) = match observation.price {
            PriceOutcome::Amount(p) => (p, None),
            PriceOutcome::SoldOut => (SOLD_OUT_PRICE, None),
            PriceOutcome::Failed => (0.0, Some("price not found")),
        };
        serde_json::json!({
            "storeId": self.store_id_for(&observation.hotel_id),
            "hotelId": observation.hotel_id,
            "type": observation.kind,
            "date": observation.date,
            "error": error,
            "prices": [{ "price": price, "roomType": "" }],
        })
    }

    /// Whether an identical upload went out inside the dedup window. Records this one.
    fn recently_sent(&self, payload: &serde_json::Value) -> bool {
        let key = format!(
            "{}|{}|{}|{}",
            payload["storeId"], payload["hotelId"], payload["date"], payload["prices"][0]["price"]
        );
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.retain(|_, at| now.duration_since(*at) < UPLOAD_DEDUP_WINDOW);
        recent.insert(key, now).is_some()
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(&self, observation: &Observation) -> Result<ReportAck> {
        let payload = self.payload(observation);
        if self.recently_sent(&payload) {
            tracing::debug!("Upload suppressed, sent within 15s: {}", observation.hotel_id);
            return Ok(ReportAck {
                success: true,
                error: None,
            });
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RatewatchError::Report(format!("Upload failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RatewatchError::Report(format!("Backend error {status}: {body}")));
        }
        let ack: ReportAck = resp
            .json()
            .await
            .map_err(|e| RatewatchError::Report(format!("Bad backend response: {e}")))?;
        if ack.success {
            tracing::info!("📤 Uploaded {} ({})", observation.hotel_id, observation.date);
        }
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ratewatch_core::{MemoryStore, Task, TaskKind};

    fn observation(price: PriceOutcome) -> Observation {
        let task = Task {
            hotel_id: "12".into(),
            hotel_name: "Garden".into(),
            target_url: "https://hotels.example.com/12.html".into(),
            kind: TaskKind::Future,
            target_date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        };
        let at = task.target_date.and_hms_opt(9, 0, 0).unwrap().and_utc();
        Observation::new(&task, price, at)
    }

    fn config() -> BackendConfig {
        BackendConfig {
            api_base_url: "http://backend.local/".into(),
            store_id: "main".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_shape() {
        let reporter = HttpReporter::new(&config());
        assert_eq!(reporter.endpoint, "http://backend.local/api/plugin/prices");

        let body = reporter.payload(&observation(PriceOutcome::Amount(512.0)));
        assert_eq!(body["storeId"], "main");
        assert_eq!(body["hotelId"], "12");
        assert_eq!(body["type"], "future");
        assert_eq!(body["date"], "2026-08-01");
        assert_eq!(body["error"], serde_json::Value::Null);
        assert_eq!(body["prices"][0]["price"], 512.0);

        let sold_out = reporter.payload(&observation(PriceOutcome::SoldOut));
        assert_eq!(sold_out["prices"][0]["price"], -1.0);
        let failed = reporter.payload(&observation(PriceOutcome::Failed));
        assert_eq!(failed["error"], "price not found");
    }

    #[test]
    fn test_store_id_routed_per_hotel() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(keys::HOTELS, serde_json::json!([{"id": 12, "storeId": 77}]))
            .unwrap();
        let reporter = HttpReporter::new(&config()).with_store(store);
        assert_eq!(reporter.payload(&observation(PriceOutcome::SoldOut))["storeId"], "77");
    }

    #[test]
    fn test_recent_upload_window() {
        let reporter = HttpReporter::new(&config());
        let body = reporter.payload(&observation(PriceOutcome::Amount(1.0)));
        assert!(!reporter.recently_sent(&body));
        assert!(reporter.recently_sent(&body));
        let other = reporter.payload(&observation(PriceOutcome::Amount(2.0)));
        assert!(!reporter.recently_sent(&other));
    }
}
