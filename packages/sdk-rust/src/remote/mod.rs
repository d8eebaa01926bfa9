//! Outbound calls made from handler bodies.
//!
//! Every call derives its timeout from the inbound deadline, carries the
//! caller's trace and language downstream, and (for transactional
//! propagators) the transaction ids. Connection failures may be retried;
//! a per-service circuit breaker fails fast when a downstream is unhealthy.

pub mod breaker;
pub mod semi_sync;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use sedmesh_core::{keys, Codec, Message, Properties, TraceContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

pub use breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use semi_sync::{PendingReplies, PendingReply};
pub use transport::{HttpTransport, JsonWireCodec};

use crate::error::SedError;
use crate::service::config::{BreakerConfig, ResponseMapping, RetryConfig};
use crate::service::context::CallContext;
use crate::traits::{LookupService, Transport};

/// Counter of outbound calls by service and outcome.
pub const REMOTE_CALLS: &str = "sed_remote_calls_total";
/// Histogram of outbound call latency, in microseconds.
pub const REMOTE_DURATION_US: &str = "sed_remote_call_duration_us";

// ---------------------------------------------------------------------------
// Call parameters
// ---------------------------------------------------------------------------

/// Where a call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A service unit, addressed directly.
    Su(String),
    /// A sharding element, resolved to an SU by the lookup service.
    Element { dimension: String, element: String },
    /// The SU configured for a downstream service key.
    Service(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Sync,
    Async,
    SemiSync,
}

impl CallKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => keys::call_type::SYNC,
            Self::Async => keys::call_type::ASYNC,
            Self::SemiSync => keys::call_type::SEMI_SYNC,
        }
    }
}

/// Per-call overrides. Unset fields fall back to the downstream
/// configuration of the service key.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub path: Option<String>,
    pub event_id: Option<String>,
    /// Extra request properties.
    pub properties: Properties,
    pub codec: Codec,
}

impl CallOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, value);
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
}

/// What happened on the wire for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMeta {
    pub su: String,
    pub event_id: String,
    pub trace_id: String,
    /// Span id of the outbound request.
    pub span_id: String,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Properties of the reply (the acknowledgement for async calls).
    pub properties: Properties,
}

// ---------------------------------------------------------------------------
// RemoteCaller
// ---------------------------------------------------------------------------

pub struct RemoteCaller {
    transport: Arc<dyn Transport>,
    lookup: Option<Arc<dyn LookupService>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    pending: PendingReplies,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RemoteCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCaller")
            .field("breakers", &self.breakers.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl RemoteCaller {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            lookup: None,
            breakers: DashMap::new(),
            pending: PendingReplies::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Enables [`Destination::Element`].
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<dyn LookupService>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Breaker of `service_key`, once a call has created it.
    #[must_use]
    pub fn breaker(&self, service_key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service_key).map(|b| Arc::clone(b.value()))
    }

    #[must_use]
    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    /// Calls `service_key` and waits for its reply.
    ///
    /// # Errors
    ///
    /// Remote failures (timeout, connection, open circuit), reply decoding
    /// failures, and non-success codes in the reply as business errors.
    pub async fn sync_call<Req, Resp>(
        &self,
        ctx: &CallContext,
        destination: &Destination,
        service_key: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<(CallMeta, Resp), SedError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let (meta, reply) = self
            .call(ctx, CallKind::Sync, destination, service_key, request, options)
            .await?;
        let response = parse_reply(ctx.response_mapping(), options.codec, &reply)?;
        Ok((meta, response))
    }

    /// [`sync_call`](Self::sync_call) to an SU.
    ///
    /// # Errors
    ///
    /// As [`sync_call`](Self::sync_call).
    pub async fn sync_call_su<Req, Resp>(
        &self,
        ctx: &CallContext,
        su: &str,
        service_key: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<(CallMeta, Resp), SedError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let destination = Destination::Su(su.to_owned());
        self.sync_call(ctx, &destination, service_key, request, options).await
    }

    /// [`sync_call`](Self::sync_call) to a sharding element.
    ///
    /// # Errors
    ///
    /// As [`sync_call`](Self::sync_call), plus lookup failures.
    pub async fn sync_call_element<Req, Resp>(
        &self,
        ctx: &CallContext,
        dimension: &str,
        element: &str,
        service_key: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<(CallMeta, Resp), SedError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let destination = Destination::Element {
            dimension: dimension.to_owned(),
            element: element.to_owned(),
        };
        self.sync_call(ctx, &destination, service_key, request, options).await
    }

    /// Fire-and-forget: returns once the broker accepted the request.
    ///
    /// # Errors
    ///
    /// Remote failures, or a non-success code on the acknowledgement.
    pub async fn async_call<Req>(
        &self,
        ctx: &CallContext,
        destination: &Destination,
        service_key: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<CallMeta, SedError>
    where
        Req: Serialize + ?Sized,
    {
        let (meta, ack) = self
            .call(ctx, CallKind::Async, destination, service_key, request, options)
            .await?;
        reject_error_code(&ack)?;
        Ok(meta)
    }

    /// Sends the request, then waits for the out-of-band reply delivered
    /// through [`complete_semi_sync`](Self::complete_semi_sync).
    ///
    /// # Errors
    ///
    /// As [`sync_call`](Self::sync_call); a reply that does not arrive within
    /// the timeout is a remote timeout.
    pub async fn semi_sync_call<Req, Resp>(
        &self,
        ctx: &CallContext,
        destination: &Destination,
        service_key: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<(CallMeta, Resp), SedError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let (meta, reply) = self
            .call(ctx, CallKind::SemiSync, destination, service_key, request, options)
            .await?;
        let response = parse_reply(ctx.response_mapping(), options.codec, &reply)?;
        Ok((meta, response))
    }

    /// Delivers an out-of-band reply to its waiting semi-sync call, matched
    /// by span id. Returns `false` when no call is waiting for it.
    pub fn complete_semi_sync(&self, reply: Message) -> bool {
        let Some(key) = reply.properties.non_empty(keys::SPAN_ID).map(str::to_owned) else {
            return false;
        };
        let delivered = self.pending.complete(&key, reply);
        if !delivered {
            debug!(span_id = %key, "semi-sync reply has no waiter");
        }
        delivered
    }

    async fn call<Req>(
        &self,
        ctx: &CallContext,
        kind: CallKind,
        destination: &Destination,
        service_key: &str,
        request: &Req,
        options: &CallOptions,
    ) -> Result<(CallMeta, Message), SedError>
    where
        Req: Serialize + ?Sized,
    {
        let payload = options
            .codec
            .encode(request)
            .map_err(|e| SedError::Encode(e.to_string()))?;
        let span = info_span!(
            "remote_call",
            service = service_key,
            call_type = kind.as_str(),
            su = tracing::field::Empty,
        );
        let started = Instant::now();
        let result = self
            .exchange(ctx, kind, destination, service_key, payload, options)
            .instrument(span)
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!(REMOTE_CALLS, "service" => service_key.to_owned(), "outcome" => outcome).increment(1);
        #[allow(clippy::cast_precision_loss)]
        let sample = started.elapsed().as_micros() as f64;
        metrics::histogram!(REMOTE_DURATION_US, "service" => service_key.to_owned()).record(sample);
        result
    }

    async fn exchange(
        &self,
        ctx: &CallContext,
        kind: CallKind,
        destination: &Destination,
        service_key: &str,
        payload: Vec<u8>,
        options: &CallOptions,
    ) -> Result<(CallMeta, Message), SedError> {
        let started = Instant::now();
        let downstream = ctx.downstream(service_key);
        let remaining = ctx.remaining();
        if remaining.is_zero() {
            return Err(SedError::RemoteTimeout {
                target: service_key.to_owned(),
                timeout_ms: 0,
            });
        }
        let configured = options
            .timeout
            .or_else(|| downstream.timeout_ms.map(Duration::from_millis))
            .unwrap_or_else(|| Duration::from_millis(ctx.config().default_timeout_ms));
        let timeout = configured.min(remaining);
        let deadline = started + timeout;

        let su = self.resolve(ctx, destination, service_key, deadline, timeout).await?;
        tracing::Span::current().record("su", su.as_str());

        let permit = match self.breaker_for(service_key, downstream.circuit_breaker.as_ref()) {
            None => None,
            Some(breaker) => Some(breaker.try_acquire().ok_or_else(|| SedError::CircuitOpen {
                service: service_key.to_owned(),
            })?),
        };

        let event_id = options
            .event_id
            .clone()
            .or_else(|| downstream.event_id.clone())
            .unwrap_or_else(|| service_key.to_owned());
        let trace = ctx.trace.child();
        let request = self.build_request(ctx, kind, &su, &event_id, &trace, payload, options);
        let path = options.path.as_deref().unwrap_or(&downstream.path);

        let waiter = (kind == CallKind::SemiSync).then(|| self.pending.register(trace.span_id.clone()));
        let (result, attempts) = self
            .post_with_retry(ctx, request, path, deadline, &downstream.retry, service_key)
            .await;
        if let Some(permit) = permit {
            match &result {
                Ok(_) => permit.succeeded(),
                Err(SedError::Cancelled) => drop(permit),
                Err(_) => permit.failed(),
            }
        }
        let ack = result?;

        let reply = match waiter {
            None => ack,
            Some(waiter) => {
                reject_error_code(&ack)?;
                match tokio::time::timeout_at(deadline, waiter.wait()).await {
                    Ok(Some(reply)) => reply,
                    Ok(None) => {
                        return Err(SedError::RemoteConnection {
                            target: service_key.to_owned(),
                            message: "semi-sync wait superseded".to_owned(),
                        })
                    }
                    Err(_) => {
                        return Err(SedError::RemoteTimeout {
                            target: service_key.to_owned(),
                            timeout_ms: millis(timeout),
                        })
                    }
                }
            }
        };

        let meta = CallMeta {
            su,
            event_id,
            trace_id: trace.trace_id,
            span_id: trace.span_id,
            attempts,
            elapsed: started.elapsed(),
            properties: reply.properties.clone(),
        };
        Ok((meta, reply))
    }

    async fn resolve(
        &self,
        ctx: &CallContext,
        destination: &Destination,
        service_key: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<String, SedError> {
        match destination {
            Destination::Su(su) => Ok(su.clone()),
            Destination::Service(key) => ctx.downstream(key).su.ok_or_else(|| SedError::RemoteConnection {
                target: service_key.to_owned(),
                message: format!("no su configured for service {key}"),
            }),
            Destination::Element { dimension, element } => {
                let lookup = self
                    .lookup
                    .as_ref()
                    .ok_or_else(|| SedError::Internal("no lookup service configured".to_owned()))?;
                let target = format!("{dimension}/{element}");
                let bounded = tokio::time::timeout_at(deadline, lookup.lookup(dimension, element));
                let outcome = tokio::select! {
                    biased;
                    () = ctx.cancellation().cancelled() => return Err(SedError::Cancelled),
                    outcome = bounded => outcome,
                };
                match outcome {
                    Ok(Ok(su)) => Ok(su),
                    Ok(Err(e)) => Err(SedError::RemoteConnection {
                        target,
                        message: format!("lookup failed: {e}"),
                    }),
                    Err(_) => Err(SedError::RemoteTimeout {
                        target,
                        timeout_ms: millis(timeout),
                    }),
                }
            }
        }
    }

    /// Breaker of a service key under its current settings. A changed
    /// policy replaces the breaker; a removed one drops it.
    fn breaker_for(&self, service_key: &str, config: Option<&BreakerConfig>) -> Option<Arc<CircuitBreaker>> {
        let Some(config) = config else {
            self.breakers.remove(service_key);
            return None;
        };
        let mut entry = self
            .breakers
            .entry(service_key.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service_key, config.clone())));
        if entry.config() != config {
            debug!(service = service_key, "circuit breaker settings changed, resetting");
            *entry = Arc::new(CircuitBreaker::new(service_key, config.clone()));
        }
        Some(Arc::clone(entry.value()))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_request(
        &self,
        ctx: &CallContext,
        kind: CallKind,
        su: &str,
        event_id: &str,
        trace: &TraceContext,
        payload: Vec<u8>,
        options: &CallOptions,
    ) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut request = Message::request(id, event_id, payload);
        request.need_reply = kind != CallKind::Async;

        let identity = &ctx.config().identity;
        let topic_type = match kind {
            CallKind::Async => keys::topic_type::EVENT,
            CallKind::Sync | CallKind::SemiSync => keys::topic_type::RPC,
        };
        request.topic.set(keys::topic::TOPIC_TYPE, topic_type);
        for (key, value) in [
            (keys::topic::SRC_ORG, &identity.org),
            (keys::topic::SRC_WORKSPACE, &identity.workspace),
            (keys::topic::SRC_ENV, &identity.env),
            (keys::topic::SRC_SU, &identity.su),
            (keys::topic::SRC_NODE, &identity.node),
            (keys::topic::SRC_INSTANCE, &identity.instance),
        ] {
            if !value.is_empty() {
                request.topic.set(key, value.as_str());
            }
        }
        request.topic.set(keys::topic::DST_SU, su);

        request.properties.merge(&options.properties);
        trace.inject(&mut request.properties);
        request
            .properties
            .insert(ctx.config().language_key.clone(), ctx.language.clone());
        request.properties.insert(keys::CALL_TYPE, kind.as_str());
        if let Some(tx) = ctx.tx.as_ref().filter(|tx| tx.propagate) {
            tx.inject(&mut request.properties);
        }
        request
    }

    /// Posts with retries of connection-class failures. Every attempt
    /// carries, and is bounded by, the budget left until `deadline`.
    async fn post_with_retry(
        &self,
        ctx: &CallContext,
        request: Message,
        path: &str,
        deadline: Instant,
        retry: &RetryConfig,
        target: &str,
    ) -> (Result<Message, SedError>, u32) {
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let budget = deadline.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                let err = SedError::RemoteTimeout {
                    target: target.to_owned(),
                    timeout_ms: 0,
                };
                return (Err(err), attempt);
            }
            attempt += 1;

            let mut outbound = request.clone();
            outbound
                .properties
                .insert(keys::REMAINING_TIMEOUT, millis(budget).to_string());
            let post = tokio::time::timeout_at(deadline, self.transport.post(outbound, path, budget));
            let outcome = tokio::select! {
                biased;
                () = ctx.cancellation().cancelled() => return (Err(SedError::Cancelled), attempt),
                outcome = post => outcome,
            };
            let err = match outcome {
                Ok(Ok(reply)) => return (Ok(reply), attempt),
                Ok(Err(e)) => e.into_sed(target, millis(budget)),
                Err(_) => SedError::RemoteTimeout {
                    target: target.to_owned(),
                    timeout_ms: millis(budget),
                },
            };
            if !err.is_retryable() || attempt >= max_attempts {
                return (Err(err), attempt);
            }
            let pause = backoff(retry, attempt);
            if Instant::now() + pause >= deadline {
                return (Err(err), attempt);
            }
            debug!(attempt, backoff_ms = millis(pause), error = %err, "retrying remote call");
            tokio::time::sleep(pause).await;
        }
    }
}

/// Exponential backoff with equal jitter: half fixed, half random.
fn backoff(retry: &RetryConfig, attempt: u32) -> Duration {
    let exp = retry
        .backoff_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
        .min(retry.max_backoff_ms);
    let half = exp / 2;
    let jitter = rand::rng().random_range(0..=exp - half);
    Duration::from_millis(half + jitter)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn reject_error_code(reply: &Message) -> Result<(), SedError> {
    match reply.error_code() {
        Some(code) => Err(SedError::business(
            code,
            reply.properties.get(keys::ERROR_MSG).unwrap_or_default(),
        )),
        None => Ok(()),
    }
}

/// Turns a reply into the caller's response type.
///
/// An `errorCode` property wins. Otherwise a JSON body carrying the mapped
/// code field is unwrapped: a non-success code becomes a business error and
/// the data field is decoded. Any other body is decoded as is.
fn parse_reply<Resp: DeserializeOwned>(
    mapping: &ResponseMapping,
    codec: Codec,
    reply: &Message,
) -> Result<Resp, SedError> {
    reject_error_code(reply)?;
    let decode_err = |e: &dyn std::fmt::Display| SedError::Decode(format!("reply body: {e}"));

    if codec == Codec::Json && !reply.payload.is_empty() {
        if let Ok(Value::Object(mut body)) = serde_json::from_slice::<Value>(&reply.payload) {
            if let Some(code) = body.get(&mapping.code_field) {
                let code = match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if code != mapping.success_code {
                    let message = body
                        .get(&mapping.message_field)
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    return Err(SedError::business(code, message));
                }
                let data = body.remove(&mapping.data_field).unwrap_or(Value::Null);
                return serde_json::from_value(data).map_err(|e| decode_err(&e));
            }
        }
    }
    codec.decode(&reply.payload).map_err(|e| decode_err(&e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
