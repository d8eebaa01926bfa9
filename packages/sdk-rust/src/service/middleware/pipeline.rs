//! Pipeline composition: wraps the executor in the tower layer stack.

use std::convert::Infallible;
use std::sync::Arc;

use sedmesh_core::Message;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::service::executor::{DispatchService, Executor};

/// Build the dispatch pipeline around `executor`.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- in-flight gauge and reply codes, shed replies included
/// 2. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
///
/// Deadlines, panics and interceptors are handled inside the executor.
#[must_use]
pub fn build_dispatch_pipeline(
    executor: Arc<Executor>,
) -> impl tower::Service<Message, Response = Message, Error = Infallible> + Clone {
    let config = executor.config().clone();
    let max_concurrent = config.load().max_concurrent_dispatches;
    let renderer = executor.renderer().clone();
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(LoadShedLayer::new(max_concurrent, config, renderer))
        .service(DispatchService::new(executor))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
