//! Ordered interceptor chain wrapping every dispatch.
//!
//! Pre-handles run in registration order; the first error stops the
//! forward pass. Post-handles then run in exact reverse order for every
//! stage whose pre-handle succeeded, on success and on failure alike.
//! Stages never mutate shared state: they return a [`PreHandled`] or
//! [`PostHandled`] value and the chain threads it to the next stage.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sedmesh_core::Message;
use tracing::warn;

use super::{apm::ApmInterceptor, audit::AuditInterceptor, logging::LoggingInterceptor};
use super::{template::ResponseTemplateInterceptor, transaction::TransactionInterceptor};
use crate::error::SedError;
use crate::service::context::CallContext;

/// Result of a pre-handle stage.
#[derive(Debug)]
pub enum PreHandled {
    Continue,
    /// Continue with an enriched context.
    WithContext(CallContext),
    /// Continue with a new context and request.
    Rewrite { ctx: CallContext, request: Message },
}

/// Result of a post-handle stage.
#[derive(Debug)]
pub enum PostHandled {
    Continue,
    /// Continue with a replaced response.
    Replace(Message),
}

/// One `{pre_handle, post_handle}` stage. Stateless with respect to a
/// single dispatch and shared read-only across dispatches.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_handle(&self, _ctx: &CallContext, _request: &Message) -> Result<PreHandled, SedError> {
        Ok(PreHandled::Continue)
    }

    /// `error` is the dispatch error so far, if any.
    async fn post_handle(
        &self,
        _ctx: &CallContext,
        _request: &Message,
        _response: &Message,
        _error: Option<&SedError>,
    ) -> Result<PostHandled, SedError> {
        Ok(PostHandled::Continue)
    }
}

/// State after the forward pass.
#[derive(Debug)]
pub struct PreOutcome {
    pub ctx: CallContext,
    pub request: Message,
    /// Number of leading stages whose pre-handle succeeded.
    pub entered: usize,
    pub error: Option<SedError>,
}

/// Immutable, cheaply cloned list of stages stored in a descriptor.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Arc<[Arc<dyn Interceptor>]>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl InterceptorChain {
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Forward pass.
    pub async fn run_pre(&self, mut ctx: CallContext, mut request: Message) -> PreOutcome {
        for (index, stage) in self.stages.iter().enumerate() {
            match stage.pre_handle(&ctx, &request).await {
                Ok(PreHandled::Continue) => {}
                Ok(PreHandled::WithContext(next)) => ctx = next,
                Ok(PreHandled::Rewrite { ctx: next, request: rewritten }) => {
                    ctx = next;
                    request = rewritten;
                }
                Err(error) => {
                    return PreOutcome {
                        ctx,
                        request,
                        entered: index,
                        error: Some(error),
                    };
                }
            }
        }
        PreOutcome {
            ctx,
            request,
            entered: self.stages.len(),
            error: None,
        }
    }

    /// Reverse pass over the first `entered` stages.
    ///
    /// A post-handle error is logged and halts the remaining post-handles;
    /// it becomes the dispatch error only when there was none before.
    pub async fn run_post(
        &self,
        entered: usize,
        ctx: &CallContext,
        request: &Message,
        mut response: Message,
        mut error: Option<SedError>,
    ) -> (Message, Option<SedError>) {
        let entered = entered.min(self.stages.len());
        for stage in self.stages[..entered].iter().rev() {
            match stage.post_handle(ctx, request, &response, error.as_ref()).await {
                Ok(PostHandled::Continue) => {}
                Ok(PostHandled::Replace(next)) => response = next,
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "post-handle failed");
                    error.get_or_insert(e);
                    break;
                }
            }
        }
        (response, error)
    }
}

/// Mutable interceptor list used at registration time; routes snapshot it
/// into an [`InterceptorChain`].
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl InterceptorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in stages in their default order: `transaction`, `logging`,
    /// `apm`, `audit`, `response_template`.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            stages: vec![
                Arc::new(TransactionInterceptor),
                Arc::new(LoggingInterceptor),
                Arc::new(ApmInterceptor),
                Arc::new(AuditInterceptor::default()),
                Arc::new(ResponseTemplateInterceptor),
            ],
        }
    }

    /// Appends a stage.
    pub fn add(&mut self, stage: Arc<dyn Interceptor>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Removes every stage named `name`; returns whether any was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|s| s.name() != name);
        self.stages.len() != before
    }

    /// Replaces the whole list.
    pub fn replace(&mut self, stages: Vec<Arc<dyn Interceptor>>) -> &mut Self {
        self.stages = stages;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> InterceptorChain {
        InterceptorChain::new(self.stages.clone())
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}
