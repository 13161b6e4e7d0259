//! Webhook observer.
//!
//! Each event is POSTed from a background task so the bus never waits on the
//! network. In-flight deliveries are tracked and can be drained with
//! [`Observer::flush`] before the runtime shuts down.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::error::ObserverError;
use crate::observer::{Observer, ObserverEvent};

const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 2000;
const MAX_WEBHOOK_TIMEOUT_MS: u64 = 30_000;

/// Webhook target configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Stable observer name used in logs.
    pub name: String,
    /// Target URL.
    pub url: String,
    /// Optional static headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WebhookConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: HashMap::new(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    observer: &'a str,
    timestamp: String,
    event: &'a ObserverEvent,
}

/// POSTs each event as JSON without waiting for the response.
pub struct WebhookObserver {
    name: String,
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    in_flight: Mutex<JoinSet<()>>,
}

impl WebhookObserver {
    pub fn from_config(config: WebhookConfig) -> Result<Self, ObserverError> {
        if reqwest::Url::parse(&config.url).is_err() {
            return Err(ObserverError::InvalidConfig {
                name: config.name,
                reason: format!("invalid url: {}", config.url),
            });
        }

        let ms = config.timeout_ms.unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_MS);
        if ms == 0 || ms > MAX_WEBHOOK_TIMEOUT_MS {
            return Err(ObserverError::InvalidConfig {
                name: config.name,
                reason: format!("timeout must be between 1 and {MAX_WEBHOOK_TIMEOUT_MS} ms"),
            });
        }
        let timeout = Duration::from_millis(ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ObserverError::InvalidConfig {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: config.name,
            client,
            url: config.url,
            headers: config.headers,
            timeout,
            in_flight: Mutex::new(JoinSet::new()),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliveries spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.deliveries().len()
    }

    fn deliveries(&self) -> MutexGuard<'_, JoinSet<()>> {
        // A panicked delivery task cannot leave the set inconsistent.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Observer for WebhookObserver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, event: &ObserverEvent) -> Result<(), ObserverError> {
        let payload = WebhookPayload {
            observer: &self.name,
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        };
        let body = serde_json::to_value(&payload).map_err(|e| ObserverError::DeliveryFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let client = self.client.clone();
        let url = self.url.clone();
        let headers = self.headers.clone();
        let name = self.name.clone();

        let mut deliveries = self.deliveries();
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn(async move {
            let mut request = client.post(url).json(&body);

            for (header, value) in headers {
                request = request.header(header, value);
            }

            if let Err(err) = request.send().await {
                tracing::warn!(observer = %name, error = %err, "Webhook delivery failed");
            }
        });

        Ok(())
    }

    async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.deliveries());
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        let drained = tokio::time::timeout(self.timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                observer = %self.name,
                pending = pending.len(),
                "Webhook deliveries still pending at flush deadline, abandoning"
            );
        } else {
            tracing::debug!(observer = %self.name, count, "Webhook deliveries flushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::observer::WorkflowStatus;

    fn completed() -> ObserverEvent {
        ObserverEvent::WorkflowStatus {
            workflow_id: "wf".to_string(),
            status: WorkflowStatus::Completed,
            agents: BTreeMap::new(),
        }
    }

    /// Accepts one connection, reports the raw request, then answers 200.
    async fn one_shot_server() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || String::from_utf8_lossy(&request).contains("\"completed\"") {
                    break;
                }
            }
            tx.send(String::from_utf8_lossy(&request).into_owned()).unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        (url, rx)
    }

    #[test]
    fn test_rejects_invalid_url() {
        let result = WebhookObserver::from_config(WebhookConfig::new("hook", "not a url"));
        assert!(matches!(result, Err(ObserverError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        let mut config = WebhookConfig::new("hook", "http://127.0.0.1:9/hook");
        config.timeout_ms = Some(0);
        assert!(WebhookObserver::from_config(config.clone()).is_err());

        config.timeout_ms = Some(MAX_WEBHOOK_TIMEOUT_MS + 1);
        assert!(WebhookObserver::from_config(config).is_err());
    }

    #[tokio::test]
    async fn test_notify_returns_immediately() {
        let mut config = WebhookConfig::new("hook", "http://127.0.0.1:9/hook");
        config.timeout_ms = Some(1000);
        config
            .headers
            .insert("x-relay".to_string(), "test".to_string());
        let observer = WebhookObserver::from_config(config).unwrap();
        assert_eq!(observer.timeout(), Duration::from_millis(1000));

        // Delivery to a closed port fails in the background only.
        assert!(observer.notify(&completed()).await.is_ok());
        observer.flush().await;
        assert_eq!(observer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_flush_waits_for_final_delivery() {
        let (url, mut rx) = one_shot_server().await;
        let mut config = WebhookConfig::new("hook", url);
        config
            .headers
            .insert("x-relay".to_string(), "test".to_string());
        let observer = WebhookObserver::from_config(config).unwrap();

        observer.notify(&completed()).await.unwrap();
        observer.flush().await;

        let request = rx.try_recv().unwrap();
        assert!(request.starts_with("POST /hook"), "{request}");
        assert!(request.contains("x-relay: test"), "{request}");
        assert!(request.contains("\"status\":\"completed\""), "{request}");
        assert_eq!(observer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_flush_without_deliveries_returns() {
        let observer =
            WebhookObserver::from_config(WebhookConfig::new("hook", "http://127.0.0.1:9/hook"))
                .unwrap();
        observer.flush().await;
        assert_eq!(observer.in_flight(), 0);
    }
}
