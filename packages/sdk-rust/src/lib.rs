//! sedmesh SDK: attaches application services to the event-mesh broker.
//!
//! Inbound messages are routed to registered handler methods through an
//! ordered interceptor chain ([`service`]); handlers call other services
//! through the remote call façade ([`remote`]); compensable handlers take part
//! in Try-Confirm-Cancel transactions ([`tcc`]).

pub mod error;
pub mod lifecycle;
pub mod remote;
pub mod service;
pub mod tcc;
pub mod telemetry;
pub mod traits;

pub use error::{BranchPhase, ErrorKind, RegistrationError, SedError, TransportError};
pub use remote::{CallKind, CallMeta, CallOptions, Destination, RemoteCaller};
pub use service::{
    CallContext, ConfigHandle, Executor, Method, RouteOptions, RouterBuilder, Routes, SdkConfig,
};
pub use tcc::{BranchInvoker, BranchLedger, CompensableDescriptor, CompensableRegistry};
