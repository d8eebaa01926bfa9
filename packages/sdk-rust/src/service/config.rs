use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use super::worker::BackgroundRunnable;
use crate::traits::ConfigSource;

/// SDK-level configuration for the dispatch engine.
///
/// Every field has a usable default, so `SdkConfig::default()` is a working
/// configuration for tests and single-node setups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SdkConfig {
    /// Identity of this service instance on the mesh.
    pub identity: NodeIdentity,
    /// Inbound property carrying the caller's language.
    pub language_key: String,
    /// Language used when the caller declares none.
    pub default_language: String,
    /// Budget of an inbound call that carries no remaining-timeout property.
    pub default_timeout_ms: u64,
    /// Concurrent dispatches before load shedding.
    pub max_concurrent_dispatches: u32,
    pub response: ResponseConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
    pub tcc: TccConfig,
    /// Downstream services by service key.
    pub downstream: HashMap<String, DownstreamConfig>,
    /// Translations: language -> message key -> text.
    pub messages: HashMap<String, HashMap<String, String>>,
    pub heartbeat_interval_ms: u64,
    pub status_poll_interval_ms: u64,
    pub config_poll_interval_ms: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            identity: NodeIdentity::default(),
            language_key: sedmesh_core::keys::LANGUAGE.to_string(),
            default_language: "en".to_string(),
            default_timeout_ms: 30_000,
            max_concurrent_dispatches: 1000,
            response: ResponseConfig::default(),
            validation: ValidationConfig::default(),
            logging: LoggingConfig::default(),
            tcc: TccConfig::default(),
            downstream: HashMap::new(),
            messages: HashMap::new(),
            heartbeat_interval_ms: 10_000,
            status_poll_interval_ms: 5_000,
            config_poll_interval_ms: 30_000,
        }
    }
}

impl SdkConfig {
    /// Parses a JSON document; absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or a field has the
    /// wrong type.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Configuration of a downstream service key, or the defaults.
    #[must_use]
    pub fn downstream(&self, service_key: &str) -> DownstreamConfig {
        self.downstream.get(service_key).cloned().unwrap_or_default()
    }
}

/// Identity of this instance; the source of outbound routing attributes and
/// of synthesized trace ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeIdentity {
    pub org: String,
    pub workspace: String,
    pub env: String,
    pub su: String,
    pub node: String,
    pub instance: String,
}

/// Response rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResponseConfig {
    /// Error body template. Slots: `{{code}}`, `{{message}}`, `{{detail}}`.
    pub error_template: String,
    /// Success body template applied by the `response_template` stage. Slot
    /// `{{data}}` receives the raw JSON body. `None` leaves bodies untouched.
    pub success_template: Option<String>,
    /// Whether `{{detail}}` receives debug strings; empty otherwise.
    pub expose_detail: bool,
    pub mapping: ResponseMapping,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            error_template: r#"{"errorCode":"{{code}}","errorMsg":"{{message}}","detail":"{{detail}}"}"#
                .to_string(),
            success_template: None,
            expose_detail: true,
            mapping: ResponseMapping::default(),
        }
    }
}

/// How to auto-parse a downstream reply body into code, message and data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResponseMapping {
    pub code_field: String,
    pub message_field: String,
    pub data_field: String,
    pub success_code: String,
}

impl Default for ResponseMapping {
    fn default() -> Self {
        Self {
            code_field: "errorCode".to_string(),
            message_field: "errorMsg".to_string(),
            data_field: "data".to_string(),
            success_code: sedmesh_core::error::codes::SUCCESS.to_string(),
        }
    }
}

/// Request validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Combine all field errors into one message; otherwise report the first
    /// and list every field in the error detail.
    pub combine_errors: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            combine_errors: true,
        }
    }
}

/// Settings of the `logging` interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log request and response bodies.
    pub log_bodies: bool,
    /// JSON keys (any depth, case-insensitive) whose values are masked.
    pub masked_fields: Vec<String>,
    /// Bodies longer than this are truncated in logs.
    pub max_body_len: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_bodies: true,
            masked_fields: vec!["password".to_string(), "token".to_string()],
            max_body_len: 4096,
        }
    }
}

/// Reserved event ids through which a transaction coordinator drives
/// confirm and cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TccConfig {
    pub confirm_event_id: String,
    pub cancel_event_id: String,
}

impl Default for TccConfig {
    fn default() -> Self {
        Self {
            confirm_event_id: "sed.tcc.confirm".to_string(),
            cancel_event_id: "sed.tcc.cancel".to_string(),
        }
    }
}

/// Per-service downstream call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownstreamConfig {
    /// SU hosting the service, for `Destination::Service`.
    pub su: Option<String>,
    /// Event id to address; defaults to the service key.
    pub event_id: Option<String>,
    /// Transport path.
    pub path: String,
    /// Per-call timeout; the inbound budget still caps it.
    pub timeout_ms: Option<u64>,
    pub retry: RetryConfig,
    pub circuit_breaker: Option<BreakerConfig>,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            su: None,
            event_id: None,
            path: "/sed/v1/call".to_string(),
            timeout_ms: None,
            retry: RetryConfig::default(),
            circuit_breaker: None,
        }
    }
}

/// Retry policy for connection-class failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 50,
            max_backoff_ms: 1_000,
        }
    }
}

/// Circuit breaker policy over a rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerConfig {
    pub window_ms: u64,
    /// Calls in the window before the breaker may open.
    pub min_requests: u32,
    /// Failures in the window that open the breaker.
    pub error_threshold: u32,
    /// Failure ratio in the window that opens the breaker.
    pub error_ratio: f64,
    /// Time the breaker stays open before a half-open probe.
    pub cool_down_ms: u64,
    /// Successful probes that close a half-open breaker.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_ms: 10_000,
            min_requests: 10,
            error_threshold: 5,
            error_ratio: 0.5,
            cool_down_ms: 5_000,
            half_open_probes: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigHandle
// ---------------------------------------------------------------------------

/// Live, hot-reloadable configuration.
///
/// Readers take a cheap `Arc` snapshot per dispatch; `store` swaps the whole
/// configuration atomically and bumps a version observed by subscribers.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<SdkConfig>>,
    version: Arc<watch::Sender<u64>>,
}

impl ConfigHandle {
    #[must_use]
    pub fn new(config: SdkConfig) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            version: Arc::new(tx),
        }
    }

    /// Snapshot of the current configuration.
    #[must_use]
    pub fn load(&self) -> Arc<SdkConfig> {
        self.current.load_full()
    }

    /// Replaces the configuration and notifies subscribers.
    pub fn store(&self, config: SdkConfig) {
        self.current.store(Arc::new(config));
        self.version.send_modify(|v| *v += 1);
    }

    /// Receiver notified with the new version on every `store`.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(SdkConfig::default())
    }
}

// ---------------------------------------------------------------------------
// ConfigWatcher
// ---------------------------------------------------------------------------

/// Requests accepted by the config watcher worker.
#[derive(Debug)]
pub enum ReloadTask {
    /// Reload immediately, e.g. on a change notification from the source.
    Now,
}

/// Background runnable that polls a [`ConfigSource`] and applies changed
/// configurations to a [`ConfigHandle`] without restarting the executor.
pub struct ConfigWatcher {
    source: Arc<dyn ConfigSource>,
    handle: ConfigHandle,
}

impl ConfigWatcher {
    #[must_use]
    pub fn new(source: Arc<dyn ConfigSource>, handle: ConfigHandle) -> Self {
        Self { source, handle }
    }

    async fn reload(&self) {
        match self.source.load().await {
            Ok(next) => {
                if *self.handle.load() != next {
                    self.handle.store(next);
                    info!(version = self.handle.version(), "configuration reloaded");
                }
            }
            Err(e) => warn!(error = %e, "configuration reload failed, keeping current"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for ConfigWatcher {
    type Task = ReloadTask;

    async fn run(&mut self, task: ReloadTask) {
        match task {
            ReloadTask::Now => self.reload().await,
        }
    }

    async fn on_tick(&mut self) {
        self.reload().await;
    }
}
