//! Per-dispatch call context.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sedmesh_core::{keys, Message, Properties, TopicAttributes, TraceContext, TxContext};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::{DownstreamConfig, ResponseConfig, ResponseMapping, SdkConfig};

/// Context threaded by parameter through every layer of one dispatch and
/// into the outbound calls it makes.
///
/// The context itself is immutable; stages that enrich it (transaction
/// propagation, the transaction proxy) produce a new value. The only shared
/// mutable part is the response-header slot, which handlers write to and the
/// executor merges into the outbound message.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub correlation_id: u64,
    pub event_id: String,
    pub trace: TraceContext,
    pub language: String,
    /// Routing attributes of the inbound message.
    pub topic: TopicAttributes,
    pub tx: Option<TxContext>,
    /// The inbound call expects its real reply out of band.
    pub semi_sync: bool,
    config: Arc<SdkConfig>,
    started_at: Instant,
    deadline: Instant,
    cancel: CancellationToken,
    response_headers: Arc<Mutex<Properties>>,
}

impl CallContext {
    /// Builds the context of an inbound message.
    ///
    /// Language comes from the configured property key; the deadline from
    /// the remaining-timeout property (ms), or the configured default when
    /// absent or unparsable.
    #[must_use]
    pub fn from_inbound(inbound: &Message, config: Arc<SdkConfig>, cancel: CancellationToken) -> Self {
        let language = inbound
            .properties
            .non_empty(&config.language_key)
            .map_or_else(|| config.default_language.clone(), str::to_owned);
        let budget_ms = inbound
            .properties
            .non_empty(keys::REMAINING_TIMEOUT)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(config.default_timeout_ms);
        let started_at = Instant::now();

        Self {
            correlation_id: inbound.id,
            event_id: inbound.event_id().to_owned(),
            trace: TraceContext::from_inbound(&inbound.properties, &inbound.topic, inbound.id),
            language,
            topic: inbound.topic.clone(),
            tx: None,
            semi_sync: inbound.is_semi_sync(),
            config,
            started_at,
            deadline: started_at + Duration::from_millis(budget_ms),
            cancel,
            response_headers: Arc::new(Mutex::new(Properties::new())),
        }
    }

    /// A context not tied to an inbound message (background tasks, tests).
    #[must_use]
    pub fn detached(config: Arc<SdkConfig>, budget: Duration) -> Self {
        let inbound = Message::default().with_property(
            keys::REMAINING_TIMEOUT,
            budget.as_millis().to_string(),
        );
        Self::from_inbound(&inbound, config, CancellationToken::new())
    }

    /// Same context with a different transaction identity.
    #[must_use]
    pub fn with_tx(&self, tx: Option<TxContext>) -> Self {
        Self {
            tx,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    #[must_use]
    pub fn response_template(&self) -> &ResponseConfig {
        &self.config.response
    }

    #[must_use]
    pub fn response_mapping(&self) -> &ResponseMapping {
        &self.config.response.mapping
    }

    #[must_use]
    pub fn downstream(&self, service_key: &str) -> DownstreamConfig {
        self.config.downstream(service_key)
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Budget left before the deadline; zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sets a header on the eventual response, success or failure.
    pub fn set_response_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.response_headers.lock().insert(key, value);
    }

    /// Asks the transport to drop the response of this dispatch.
    pub fn discard_response(&self) {
        self.set_response_header(keys::DISCARD_RESPONSE, "true");
    }

    #[must_use]
    pub fn response_headers(&self) -> Properties {
        self.response_headers.lock().clone()
    }
}
