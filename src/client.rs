//! HTTP client for the ingest endpoint.
//!
//! Checks records locally before sending, retries transient failures with
//! exponential backoff, and never retries a request the server rejected as
//! malformed.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ClientError;
use crate::model::{Row, REQUIRED_FIELDS};
use crate::response::Envelope;

pub const URL_ENV: &str = "TALLY_URL";
pub const TOKEN_ENV: &str = "TALLY_TOKEN";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    pub max_retries: u32,
    pub timeout: Duration,
    /// First backoff step; attempt `n` waits `backoff_base * 2^n`.
    pub backoff_base: Duration,
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            token: None,
        }
    }

    /// Reads `TALLY_URL` and, if present, `TALLY_TOKEN`.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var(URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                ClientError::Config(format!(
                    "{URL_ENV} is not set. Pass --url or export {URL_ENV}=http://host:port"
                ))
            })?;
        let mut config = Self::new(base_url);
        config.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Ok(config)
    }
}

/// Per-item result of a batch submission.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum BatchItem {
    Sent(Envelope),
    Failed { status: &'static str, message: String, item: Value },
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Sent(envelope) if envelope.is_success())
    }
}

pub struct IngestClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl IngestClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), route)
    }

    /// Submits one record, retrying transient failures.
    ///
    /// Returns the server envelope on success, or the last error envelope once
    /// retries run out on a server-side failure.
    pub async fn post_record(&self, record: &Value) -> Result<Envelope, ClientError> {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| record.get(field).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ClientError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let attempts = self.config.max_retries.max(1);
        for attempt in 0..attempts {
            let last = attempt + 1 == attempts;
            info!(attempt = attempt + 1, of = attempts, "sending record");

            match self.send_once(record).await {
                Ok(envelope) => {
                    let code = match envelope.code() {
                        None => {
                            if let Envelope::Success { row, execution_time } = &envelope {
                                info!(row, execution_time, "record stored");
                            }
                            return Ok(envelope);
                        }
                        Some(code) => code,
                    };
                    if code.is_client_error() {
                        let message = match &envelope {
                            Envelope::Error { message, .. } => message.clone(),
                            Envelope::Success { .. } => String::new(),
                        };
                        return Err(ClientError::Validation(message));
                    }
                    warn!(?code, "server reported an error");
                    if last {
                        return Ok(envelope);
                    }
                }
                Err(ClientError::Status(status)) if status < 500 => {
                    return Err(ClientError::Status(status));
                }
                Err(e) => {
                    warn!(error = %e, "request failed");
                    if last {
                        return Err(e);
                    }
                }
            }

            self.wait_before_retry(attempt).await;
        }

        Err(ClientError::Exhausted(attempts))
    }

    async fn send_once(&self, record: &Value) -> Result<Envelope, ClientError> {
        let mut request = self
            .http
            .post(self.url("ingest"))
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(record).map_err(|e| ClientError::Validation(e.to_string()))?);
        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response.json::<Envelope>().await?)
    }

    async fn wait_before_retry(&self, attempt: u32) {
        let wait = self.config.backoff_base * 2u32.saturating_pow(attempt);
        info!(wait_ms = wait.as_millis() as u64, "waiting before retry");
        tokio::time::sleep(wait).await;
    }

    /// Sends items one after another. A failed item never stops the batch.
    pub async fn post_batch(&self, items: &[Value]) -> Vec<BatchItem> {
        let mut results = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            info!(item = i + 1, of = items.len(), "processing batch item");
            let result = match self.post_record(item).await {
                Ok(envelope) => BatchItem::Sent(envelope),
                Err(e) => BatchItem::Failed {
                    status: "error",
                    message: e.to_string(),
                    item: item.clone(),
                },
            };
            results.push(result);
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        info!("batch complete: {}/{} successful", ok, items.len());
        results
    }

    /// Posts a throwaway record and reports whether the server stored it.
    pub async fn test_connection(&self) -> bool {
        let ping = json!({ "id": 0, "result": "Connection Test", "score": 0 });
        match self.send_once(&ping).await {
            Ok(envelope) if envelope.is_success() => true,
            Ok(envelope) => {
                warn!(?envelope, "connection test reached the server but was not stored");
                false
            }
            Err(e) => {
                warn!(error = %e, "connection test failed");
                false
            }
        }
    }

    pub async fn fetch_rows(&self) -> Result<Vec<Row>, ClientError> {
        let response = self.http.get(self.url("rows")).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response.json::<Vec<Row>>().await?)
    }
}

pub fn troubleshooting_checklist() -> &'static [&'static str] {
    &[
        "Is the server URL correct? (scheme, host and port, no trailing /ingest)",
        "Is the tally server running and reachable from this machine?",
        "Can the server write to its data directory?",
        "Is the configured sheet name valid?",
        "Check the server logs for errors",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::lock::LeaseLock;
    use crate::server;
    use crate::storage::MemoryStore;
    use crate::TallyService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warp::Filter;

    fn spawn_tally(service: Arc<TallyService>) -> String {
        let (addr, server) = warp::serve(server::routes(service)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        format!("http://{addr}")
    }

    fn quick_config(base_url: String) -> ClientConfig {
        ClientConfig {
            backoff_base: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            ..ClientConfig::new(base_url)
        }
    }

    fn memory_service(settings: &Settings) -> Arc<TallyService> {
        Arc::new(TallyService::with_store(Arc::new(MemoryStore::new()), settings))
    }

    #[tokio::test]
    async fn record_round_trips_through_the_server() {
        let url = spawn_tally(memory_service(&Settings::default()));
        let client = IngestClient::new(quick_config(url)).unwrap();

        let envelope = client
            .post_record(&json!({"id": 999, "result": "Test Entry", "score": 100}))
            .await
            .unwrap();
        assert!(matches!(envelope, Envelope::Success { row: 2, .. }));

        let rows = client.fetch_rows().await.unwrap();
        assert_eq!(&rows[1][1..], &[json!(999), json!("Test Entry"), json!(100)]);
    }

    #[tokio::test]
    async fn missing_fields_are_caught_before_sending() {
        let client = IngestClient::new(quick_config("http://127.0.0.1:9".into())).unwrap();
        let err = client.post_record(&json!({"id": 1})).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(msg) if msg.contains("result, score")));
    }

    #[tokio::test]
    async fn lock_timeout_is_retried_until_attempts_run_out() {
        let settings = Settings {
            lock_timeout_ms: 10,
            ..Settings::default()
        };
        let lock = Arc::new(LeaseLock::new(Duration::from_secs(60)));
        let service = Arc::new(TallyService::new(Arc::new(MemoryStore::new()), lock.clone(), &settings));
        let url = spawn_tally(service);
        let client = IngestClient::new(quick_config(url)).unwrap();

        let _held = crate::lock::LockGuard::acquire(lock.as_ref(), Duration::ZERO).unwrap();
        let envelope = client
            .post_record(&json!({"id": 1, "result": "x", "score": 1}))
            .await
            .unwrap();
        assert_eq!(envelope.code(), Some(crate::response::ErrorCode::LockTimeout));
    }

    #[tokio::test]
    async fn client_error_codes_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let route = warp::post().and(warp::path("ingest")).map(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            warp::reply::json(&json!({"status": "error", "code": "INVALID_JSON", "message": "Invalid JSON: eof"}))
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = IngestClient::new(quick_config(format!("http://{addr}"))).unwrap();
        let err = client
            .post_record(&json!({"id": 1, "result": "x", "score": 1}))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let route = warp::post().and(warp::path("ingest")).map(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let body = if n == 0 {
                json!({"status": "error", "code": "INTERNAL_ERROR", "message": "Internal server error"})
            } else {
                json!({"status": "success", "row": 2, "executionTime": 0.01})
            };
            warp::reply::json(&body)
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = IngestClient::new(quick_config(format!("http://{addr}"))).unwrap();
        let envelope = client
            .post_record(&json!({"id": 1, "result": "x", "score": 1}))
            .await
            .unwrap();

        assert!(envelope.is_success());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn batch_keeps_going_past_failures() {
        let url = spawn_tally(memory_service(&Settings::default()));
        let client = IngestClient::new(quick_config(url)).unwrap();

        let items = vec![
            json!({"id": 201, "result": "Batch Item 1", "score": 85}),
            json!({"id": 202, "score": 92}),
            json!({"id": 203, "result": "Batch Item 3", "score": 78}),
        ];
        let results = client.post_batch(&items).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert!(matches!(&results[1], BatchItem::Failed { item, .. } if item == &items[1]));
        assert!(results[2].is_success());
        assert_eq!(client.fetch_rows().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn connection_test_needs_a_stored_row() {
        let url = spawn_tally(memory_service(&Settings::default()));
        assert!(IngestClient::new(quick_config(url)).unwrap().test_connection().await);

        let unreachable = quick_config("http://127.0.0.1:9".into());
        assert!(!IngestClient::new(unreachable).unwrap().test_connection().await);
    }
}
