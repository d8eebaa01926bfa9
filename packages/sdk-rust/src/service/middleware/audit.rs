use std::sync::Arc;

use async_trait::async_trait;
use sedmesh_core::Message;
use tracing::{info, warn};

use super::chain::{Interceptor, PostHandled};
use crate::error::SedError;
use crate::service::context::CallContext;
use crate::traits::{AuditRecord, AuditSink};

/// Writes one audit record per dispatch, keyed by event id.
///
/// A failing sink is logged and never fails the dispatch.
#[derive(Clone)]
pub struct AuditInterceptor {
    sink: Arc<dyn AuditSink>,
}

impl AuditInterceptor {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

impl Default for AuditInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

#[async_trait]
impl Interceptor for AuditInterceptor {
    fn name(&self) -> &str {
        "audit"
    }

    async fn post_handle(
        &self,
        ctx: &CallContext,
        _request: &Message,
        _response: &Message,
        error: Option<&SedError>,
    ) -> Result<PostHandled, SedError> {
        let record = AuditRecord {
            event_id: ctx.event_id.clone(),
            trace_id: ctx.trace.trace_id.clone(),
            span_id: ctx.trace.span_id.clone(),
            source_su: ctx
                .topic
                .get_or_empty(sedmesh_core::keys::topic::SRC_SU)
                .to_owned(),
            error_code: error.map(|e| e.code().to_owned()),
            duration_us: u64::try_from(ctx.elapsed().as_micros()).unwrap_or(u64::MAX),
        };
        if let Err(e) = self.sink.write(record).await {
            warn!(event_id = %ctx.event_id, error = %e, "audit write failed");
        }
        Ok(PostHandled::Continue)
    }
}

/// Audit sink emitting records as tracing events on the `sed::audit`
/// target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: AuditRecord) -> anyhow::Result<()> {
        info!(
            target: "sed::audit",
            event_id = %record.event_id,
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            source_su = %record.source_su,
            error_code = record.error_code.as_deref().unwrap_or_default(),
            duration_us = record.duration_us,
            "audit"
        );
        Ok(())
    }
}
