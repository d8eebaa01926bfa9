//! Seams to the collaborators the dispatch engine consumes but does not own:
//! wire codec, transport, lookup service, config source, reply channel,
//! audit writer, translation catalog, status probe.

use std::time::Duration;

use async_trait::async_trait;
use sedmesh_core::Message;

use crate::error::TransportError;
use crate::lifecycle::status::Status;
use crate::service::config::SdkConfig;
use crate::service::context::CallContext;

/// Encodes messages for the broker transport. The engine treats the bytes as
/// opaque.
pub trait WireCodec: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransportError::Codec` if the message cannot be encoded.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, TransportError>;

    /// # Errors
    ///
    /// Returns `TransportError::Codec` if `bytes` is not a valid envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Message, TransportError>;
}

/// Outbound call surface toward the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts `message` to `path` and returns the broker's reply (the response
    /// for sync calls, an acknowledgement for async and semi-sync calls).
    async fn post(
        &self,
        message: Message,
        path: &str,
        timeout: Duration,
    ) -> Result<Message, TransportError>;
}

/// Resolves element-addressed destinations to an SU.
#[async_trait]
pub trait LookupService: Send + Sync {
    async fn lookup(&self, dimension: &str, element: &str) -> anyhow::Result<String>;
}

/// Supplies the SDK configuration; polled by the config watcher.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<SdkConfig>;
}

/// Out-of-band reply channel for semi-synchronous inbound calls.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn push_reply(&self, ctx: &CallContext, reply: Message) -> anyhow::Result<()>;
}

/// One audit trail entry, keyed by event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub event_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub source_su: String,
    pub error_code: Option<String>,
    pub duration_us: u64,
}

/// Writer of audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Looks up translated message templates.
pub trait Translator: Send + Sync {
    /// Template registered for `key` in `language`, if any.
    fn translate(&self, language: &str, key: &str) -> Option<String>;
}

/// Hook run before routing; returning a message short-circuits the dispatch.
#[async_trait]
pub trait PreDispatchHook: Send + Sync {
    async fn before_dispatch(&self, ctx: &CallContext, inbound: &Message) -> Option<Message>;
}

/// Reports the broker-side view of this client, polled by the status poller.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn poll(&self) -> anyhow::Result<Status>;
}
