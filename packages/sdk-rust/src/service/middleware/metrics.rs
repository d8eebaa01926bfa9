//! Metrics middleware for dispatches.
//!
//! Tracks the number of dispatches in flight and records the outcome of
//! every outbound message, including envelopes produced by outer layers.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use sedmesh_core::Message;
use tower::{Layer, Service};

/// Gauge of dispatches currently running.
pub const DISPATCH_IN_FLIGHT: &str = "sed_dispatch_in_flight";
/// Counter of outbound messages by error code.
pub const DISPATCH_REPLIES: &str = "sed_dispatch_replies_total";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Decrements the in-flight gauge even when the dispatch future is dropped.
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics::gauge!(DISPATCH_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::gauge!(DISPATCH_IN_FLIGHT).decrement(1.0);
    }
}

impl<S> Service<Message> for MetricsService<S>
where
    S: Service<Message, Response = Message, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = Message;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Message, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, inbound: Message) -> Self::Future {
        let guard = InFlight::enter();
        let fut = self.inner.call(inbound);
        Box::pin(async move {
            let result = fut.await;
            drop(guard);
            if let Ok(response) = &result {
                let code = response.error_code().unwrap_or("0").to_owned();
                metrics::counter!(DISPATCH_REPLIES, "code" => code).increment(1);
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
