//! Dispatch middleware.
//!
//! Interceptor stages, run per route inside the executor:
//! - [`transaction`]: lifts transaction ids into the call context
//! - [`logging`]: structured request/response logs with field masking
//! - [`apm`]: dispatch timing histogram
//! - [`audit`]: audit trail records
//! - [`template`]: success-body templating
//!
//! Tower layers, wrapped around the executor service:
//! - [`metrics`]: in-flight gauge and reply counters
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`pipeline`]: composes the layers into a single service stack

pub mod apm;
pub mod audit;
pub mod chain;
pub mod load_shed;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod template;
pub mod transaction;

pub use apm::ApmInterceptor;
pub use audit::{AuditInterceptor, TracingAuditSink};
pub use chain::{Interceptor, InterceptorChain, InterceptorRegistry, PostHandled, PreHandled, PreOutcome};
pub use load_shed::LoadShedLayer;
pub use logging::LoggingInterceptor;
pub use metrics::MetricsLayer;
pub use pipeline::build_dispatch_pipeline;
pub use template::ResponseTemplateInterceptor;
pub use transaction::TransactionInterceptor;
