//! Inbound dispatch.
//!
//! 1. **Registration** (`router`, `descriptor`, `method`): handler methods are
//!    bound to event ids, patterns and HTTP paths at startup
//! 2. **Middleware** (`middleware`): interceptor stages per route, tower
//!    layers around the executor
//! 3. **Execution** (`executor`): one inbound message in, one outbound out
//! 4. **Rendering** (`envelope`, `i18n`): localized error envelopes
//! 5. **Background workers** (`worker`): config reload and other periodic tasks

pub mod config;
pub mod context;
pub mod descriptor;
pub mod envelope;
pub mod executor;
pub mod i18n;
pub mod method;
pub mod middleware;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use config::{ConfigHandle, ConfigWatcher, DownstreamConfig, SdkConfig};
pub use context::CallContext;
pub use descriptor::{CompensableBinding, HandlerDescriptor, MatchKind, RouteOptions, ValidationPolicy};
pub use envelope::EnvelopeRenderer;
pub use executor::{DispatchService, Executor, ExecutorBuilder};
pub use i18n::CatalogTranslator;
pub use method::{Handler, Method, MethodShape, MethodSignature};
pub use middleware::{build_dispatch_pipeline, Interceptor, InterceptorChain, InterceptorRegistry};
pub use router::{RouteTable, RouterBuilder, Routes};
pub use worker::{BackgroundRunnable, BackgroundWorker};
