//! Load-shedding middleware for dispatches.
//!
//! Rejects inbound messages when the number of concurrent dispatches reaches
//! `max_concurrent_dispatches`, answering with an "overloaded" error envelope
//! instead of queueing.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use sedmesh_core::Message;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::warn;

use crate::error::SedError;
use crate::service::config::ConfigHandle;
use crate::service::context::CallContext;
use crate::service::envelope::EnvelopeRenderer;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent dispatches via a semaphore.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
    config: ConfigHandle,
    renderer: EnvelopeRenderer,
}

impl LoadShedLayer {
    /// Creates a layer with the given concurrency limit; rejections are
    /// rendered with `renderer` under the live configuration.
    #[must_use]
    pub fn new(max_concurrent: u32, config: ConfigHandle, renderer: EnvelopeRenderer) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            config,
            renderer,
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
            config: self.config.clone(),
            renderer: self.renderer.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
    config: ConfigHandle,
    renderer: EnvelopeRenderer,
}

impl<S> LoadShedService<S> {
    fn reject(&self, inbound: &Message) -> Message {
        let ctx = CallContext::from_inbound(inbound, self.config.load(), CancellationToken::new());
        warn!(event_id = %ctx.event_id, "dispatch rejected, overloaded");
        metrics::counter!("sed_dispatch_shed_total").increment(1);

        let mut response = inbound.reply();
        self.renderer
            .render(&ctx, &SedError::Overloaded, true, &mut response);
        ctx.trace.inject(&mut response.properties);
        response
    }
}

impl<S> Service<Message> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            let response = self.reject(&inbound);
            return Box::pin(async move { Ok(response) });
        };

        let fut = self.inner.call(inbound);
        Box::pin(async move {
            // Hold the permit for the duration of the dispatch.
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sedmesh_core::error::codes;
    use sedmesh_core::keys;
    use tower::ServiceExt;

    use super::*;
    use crate::service::i18n::CatalogTranslator;

    /// Service that holds each dispatch for a fixed delay.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Message> for SlowService {
        type Response = Message;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Message, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, inbound: Message) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(inbound.reply())
            })
        }
    }

    fn layer(max: u32) -> LoadShedLayer {
        let config = ConfigHandle::default();
        let renderer = EnvelopeRenderer::new(Arc::new(CatalogTranslator::new(config.clone())));
        LoadShedLayer::new(max, config, renderer)
    }

    #[tokio::test]
    async fn allows_dispatches_under_limit() {
        let svc = layer(10).layer(SlowService { delay_ms: 1 });
        let resp = svc.oneshot(Message::request(5, "E", Vec::new())).await.unwrap();
        assert_eq!(resp.id, 5);
        assert!(resp.error_code().is_none());
    }

    #[tokio::test]
    async fn rejects_with_overloaded_envelope() {
        let mut svc = layer(1).layer(SlowService { delay_ms: 500 });

        ServiceExt::<Message>::ready(&mut svc).await.unwrap();
        let _in_flight = tokio::spawn({
            let fut = svc.call(Message::request(1, "E", Vec::new()));
            async move { fut.await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let resp = svc.call(Message::request(2, "E", Vec::new())).await.unwrap();
        assert_eq!(resp.id, 2);
        assert_eq!(resp.properties.get(keys::ERROR_CODE), Some(codes::OVERLOADED));
        assert!(!resp.payload.is_empty());
    }
}
