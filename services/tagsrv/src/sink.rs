//! Upstream tag sinks
//!
//! The aggregator hands accepted EPCs to a [`TagSink`]. Sinks are shared
//! by every reader task, so implementations must tolerate concurrent calls.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{SinkConfig, SinkKind};

/// Delivery failures; the caller logs and drops the batch
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote call failed: {message}")]
    Rpc { message: String, session_expired: bool },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Destination for accepted tags
#[async_trait]
pub trait TagSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Deliver a flushed batch of distinct EPCs
    async fn deliver_batch(&self, epcs: &[String], source: &str) -> Result<(), DeliveryError>;

    /// Deliver a single EPC
    async fn deliver_tag(&self, epc: &str, source: &str) -> Result<(), DeliveryError>;
}

/// Delivery outcome counters
#[derive(Debug, Default)]
pub struct DeliveryStats {
    batches_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    tags_delivered: AtomicU64,
}

impl DeliveryStats {
    pub fn record_delivered(&self, tags: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.tags_delivered.fetch_add(tags as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches_delivered(&self) -> u64 {
        self.batches_delivered.load(Ordering::Relaxed)
    }

    pub fn batches_dropped(&self) -> u64 {
        self.batches_dropped.load(Ordering::Relaxed)
    }

    pub fn tags_delivered(&self) -> u64 {
        self.tags_delivered.load(Ordering::Relaxed)
    }
}

/// Sink that only logs deliveries
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TagSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver_batch(&self, epcs: &[String], source: &str) -> Result<(), DeliveryError> {
        info!("Batch of {} tags from {}: {}", epcs.len(), source, epcs.join(", "));
        Ok(())
    }

    async fn deliver_tag(&self, epc: &str, source: &str) -> Result<(), DeliveryError> {
        info!("Tag {} from {}", epc, source);
        Ok(())
    }
}

/// ERP sink speaking JSON-RPC (`POST {url}/jsonrpc`)
///
/// Logs in once with `common.login` and caches the uid; a call rejected
/// because the session expired triggers one fresh login and retry.
pub struct ErpSink {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    username: String,
    password: String,
    model: String,
    batch_method: String,
    single_method: String,
    uid: Mutex<Option<i64>>,
    request_id: AtomicU64,
}

impl std::fmt::Debug for ErpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErpSink")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("model", &self.model)
            .finish()
    }
}

impl ErpSink {
    pub fn new(url: &str, config: &SinkConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/jsonrpc", url.trim_end_matches('/')),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            model: config.model.clone(),
            batch_method: config.batch_method.clone(),
            single_method: config.single_method.clone(),
            uid: Mutex::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value, DeliveryError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "service": service,
                "method": method,
                "args": args,
            },
            "id": id,
        });

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| DeliveryError::Decode(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(rpc_error(error));
        }

        body.get_mut("result")
            .map(Value::take)
            .ok_or_else(|| DeliveryError::Decode("response has neither result nor error".to_string()))
    }

    async fn login(&self) -> Result<i64, DeliveryError> {
        let result = self
            .call(
                "common",
                "login",
                json!([self.database, self.username, self.password]),
            )
            .await?;

        match result.as_i64() {
            Some(uid) if uid > 0 => {
                info!("ERP login: {} as {} (uid {})", self.database, self.username, uid);
                Ok(uid)
            },
            _ => Err(DeliveryError::Auth(format!(
                "login rejected for {} on {}",
                self.username, self.database
            ))),
        }
    }

    async fn uid(&self) -> Result<i64, DeliveryError> {
        let mut cached = self.uid.lock().await;
        if let Some(uid) = *cached {
            return Ok(uid);
        }
        let uid = self.login().await?;
        *cached = Some(uid);
        Ok(uid)
    }

    async fn execute(&self, method: &str, args: Value) -> Result<Value, DeliveryError> {
        let mut relogged = false;
        loop {
            let uid = self.uid().await?;
            let params = json!([self.database, uid, self.password, self.model, method, args]);

            match self.call("object", "execute_kw", params).await {
                Err(DeliveryError::Rpc {
                    session_expired: true,
                    ref message,
                }) if !relogged => {
                    warn!("ERP session rejected ({}), logging in again", message);
                    *self.uid.lock().await = None;
                    relogged = true;
                },
                other => return other,
            }
        }
    }
}

fn rpc_error(error: &Value) -> DeliveryError {
    let data = error.get("data");
    let name = data
        .and_then(|d| d.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = data
        .and_then(|d| d.get("message"))
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    DeliveryError::Rpc {
        session_expired: name.contains("AccessDenied") || name.contains("SessionExpired"),
        message,
    }
}

#[async_trait]
impl TagSink for ErpSink {
    fn name(&self) -> &str {
        "erp"
    }

    async fn deliver_batch(&self, epcs: &[String], source: &str) -> Result<(), DeliveryError> {
        if epcs.is_empty() {
            return Ok(());
        }
        debug!("ERP batch: {} tags from {}", epcs.len(), source);
        let method = self.batch_method.clone();
        self.execute(&method, json!([epcs, source])).await?;
        Ok(())
    }

    async fn deliver_tag(&self, epc: &str, source: &str) -> Result<(), DeliveryError> {
        debug!("ERP tag: {} from {}", epc, source);
        let method = self.single_method.clone();
        self.execute(&method, json!([epc, source])).await?;
        Ok(())
    }
}

/// Build the sink described by `config`
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn TagSink>, DeliveryError> {
    match (config.kind, config.url.as_deref()) {
        (SinkKind::Erp, Some(url)) if !url.trim().is_empty() => {
            info!("ERP sink: {} (db {})", url, config.database);
            Ok(Arc::new(ErpSink::new(url, config)?))
        },
        _ => {
            warn!("No ERP URL configured, running in mock mode (deliveries are only logged)");
            Ok(Arc::new(LogSink))
        },
    }
}
