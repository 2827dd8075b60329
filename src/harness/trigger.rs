//! The state-changing request that causes a broadcast.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Local;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};

const MAX_ERROR_BODY: usize = 512;

/// JSON body posted by a trigger, tagged with a marker that identifies the
/// round in the resulting notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePayload {
    marker: String,
    body: Value,
}

impl UpdatePayload {
    /// Gold price record carrying `marker` in its `name`.
    #[must_use]
    pub fn gold_price(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        let now = Local::now();
        let step = now.timestamp().rem_euclid(100) * 1000;
        let body = json!({
            "type": "gold_1",
            "name": format!("SJC 1L {} {marker}", now.format("%H:%M:%S")),
            "karat": "24k",
            "purity": "999.9",
            "buy_price": 7_500_000 + step,
            "sell_price": 7_700_000 + step,
            "updated_at": now.to_rfc3339(),
        });
        Self { marker, body }
    }

    /// Gold price record with a fresh random marker.
    #[must_use]
    pub fn fresh() -> Self {
        Self::gold_price(random_marker())
    }

    /// Arbitrary body. Notifications match only if they echo `marker`.
    #[must_use]
    pub fn with_body(marker: impl Into<String>, body: Value) -> Self {
        Self {
            marker: marker.into(),
            body,
        }
    }

    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// 16 hex characters from the OS RNG, falling back to the clock.
fn random_marker() -> String {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        bytes = nanos.to_be_bytes();
    }
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Sends the update. Success means the server acknowledged it.
pub trait Trigger: Send + Sync {
    fn fire(&self, payload: &UpdatePayload) -> impl Future<Output = Result<()>> + Send;
}

/// POSTs the payload as JSON to the server's API endpoint.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpTrigger {
    /// # Errors
    ///
    /// `Error::InvalidUrl` for a bad endpoint, `Error::TriggerTransport` if
    /// the HTTP client cannot be built.
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        Self::with_timeout(config.trigger_url()?, config.timeouts.trigger)
    }

    /// # Errors
    ///
    /// `Error::TriggerTransport` if the HTTP client cannot be built.
    pub fn with_timeout(url: reqwest::Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    #[must_use]
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

impl Trigger for HttpTrigger {
    async fn fire(&self, payload: &UpdatePayload) -> Result<()> {
        debug!(url = %self.url, body = %payload.body(), "posting update");
        let response = self
            .client
            .post(self.url.clone())
            .json(payload.body())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), marker = payload.marker(), "update acknowledged");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(Error::TriggerRejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gold_price_carries_marker() {
        let payload = UpdatePayload::gold_price("deadbeef");
        assert_eq!(payload.marker(), "deadbeef");
        let name = payload.body()["name"].as_str().unwrap();
        assert!(name.contains("deadbeef"));
        assert_eq!(payload.body()["type"], "gold_1");
        assert_eq!(payload.body()["karat"], "24k");
        assert!(payload.body()["buy_price"].as_i64().unwrap() >= 7_500_000);
    }

    #[test]
    fn test_fresh_markers_differ() {
        let a = UpdatePayload::fresh();
        let b = UpdatePayload::fresh();
        assert_eq!(a.marker().len(), 16);
        assert!(a.marker().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.marker(), b.marker());
    }

    #[test]
    fn test_http_trigger_url() {
        let config = HarnessConfig::new("http://localhost:3010", 1).with_api_endpoint("/api/add");
        let trigger = HttpTrigger::new(&config).unwrap();
        assert_eq!(trigger.url().as_str(), "http://localhost:3010/api/add");
    }

    #[tokio::test]
    async fn test_http_trigger_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = reqwest::Url::parse(&format!("http://127.0.0.1:{port}/api/add")).unwrap();
        let trigger = HttpTrigger::with_timeout(url, Duration::from_secs(1)).unwrap();
        let result = trigger.fire(&UpdatePayload::fresh()).await;
        assert!(matches!(result, Err(Error::TriggerTransport(_))));
    }
}
