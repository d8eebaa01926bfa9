//! Dispatch timing capture.
//!
//! Records the start and duration of each dispatch in microseconds, keyed by
//! trace and span ids, as a `metrics` histogram and a tracing event.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sedmesh_core::Message;
use tracing::debug;

use super::chain::{Interceptor, PostHandled};
use crate::error::SedError;
use crate::service::context::CallContext;

/// Histogram of dispatch durations in microseconds.
pub const DISPATCH_DURATION_US: &str = "sed_dispatch_duration_us";

#[derive(Debug, Clone, Copy, Default)]
pub struct ApmInterceptor;

#[async_trait]
impl Interceptor for ApmInterceptor {
    fn name(&self) -> &str {
        "apm"
    }

    async fn post_handle(
        &self,
        ctx: &CallContext,
        _request: &Message,
        _response: &Message,
        error: Option<&SedError>,
    ) -> Result<PostHandled, SedError> {
        let elapsed = ctx.elapsed();
        let duration_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let start_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|now| now.checked_sub(elapsed))
            .and_then(|start| u64::try_from(start.as_micros()).ok())
            .unwrap_or_default();
        let outcome = if error.is_some() { "error" } else { "ok" };

        #[allow(clippy::cast_precision_loss)]
        let sample = duration_us as f64;
        metrics::histogram!(
            DISPATCH_DURATION_US,
            "event_id" => ctx.event_id.clone(),
            "outcome" => outcome
        )
        .record(sample);

        debug!(
            trace_id = %ctx.trace.trace_id,
            span_id = %ctx.trace.span_id,
            parent_span_id = %ctx.trace.parent_span_id,
            event_id = %ctx.event_id,
            start_us,
            duration_us,
            outcome,
            "apm"
        );
        Ok(PostHandled::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::service::config::SdkConfig;

    #[tokio::test]
    async fn apm_never_alters_the_response() {
        let ctx = CallContext::detached(Arc::new(SdkConfig::default()), Duration::from_secs(1));
        let request = Message::request(1, "E", Vec::new());
        let err = SedError::Overloaded;

        for error in [None, Some(&err)] {
            let post = ApmInterceptor
                .post_handle(&ctx, &request, &request.reply(), error)
                .await
                .unwrap();
            assert!(matches!(post, PostHandled::Continue));
        }
    }
}
