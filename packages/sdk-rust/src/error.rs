//! Error types of the dispatch engine.
//!
//! `SedError` is the single structured error shape that handlers, the
//! executor, the branch invoker and the remote-call façade all produce, so a
//! handler treats "my downstream failed" and "I decided to fail" alike and
//! tells them apart only by [`SedError::code`].

use std::any::Any;

use sedmesh_core::error::codes;
use sedmesh_core::FieldError;

/// Phase of a compensable branch resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchPhase {
    Confirm,
    Cancel,
}

impl BranchPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
        }
    }

    /// Error code reported when the phase method fails.
    #[must_use]
    pub fn failure_code(self) -> &'static str {
        match self {
            Self::Confirm => codes::BRANCH_CONFIRM_FAILED,
            Self::Cancel => codes::BRANCH_CANCEL_FAILED,
        }
    }
}

impl std::fmt::Display for BranchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad error category, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Routing,
    Codec,
    Validation,
    Business,
    Branch,
    Remote,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Codec => "codec",
            Self::Validation => "validation",
            Self::Business => "business",
            Self::Branch => "branch",
            Self::Remote => "remote",
            Self::Internal => "internal",
        }
    }
}

/// Structured dispatch error. Rendered exactly once into the outbound
/// message by the executor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SedError {
    #[error("cannot found handler with event id: {event_id}")]
    HandlerNotFound { event_id: String },
    #[error("cannot found handler with url path: {path}")]
    PathNotFound { path: String },
    #[error("decode request body failed: {0}")]
    Decode(String),
    #[error("encode response body failed: {0}")]
    Encode(String),
    #[error("validation failed: {}", join_fields(.errors))]
    Validation { errors: Vec<FieldError> },
    #[error("{message}")]
    Business { code: String, message: String },
    #[error("branch {phase} failed for {service}: {message}")]
    Branch {
        code: &'static str,
        phase: BranchPhase,
        service: String,
        message: String,
    },
    #[error("call to {target} timed out after {timeout_ms}ms")]
    RemoteTimeout { target: String, timeout_ms: u64 },
    #[error("call to {target} failed: {message}")]
    RemoteConnection { target: String, message: String },
    /// The downstream answered, but with a status or body the wire layer
    /// could not accept. Not retried.
    #[error("call to {target} rejected: {message}")]
    RemoteRejected { target: String, message: String },
    #[error("circuit breaker is open for {service}")]
    CircuitOpen { service: String },
    #[error("dispatch deadline exceeded after {budget_ms}ms")]
    DeadlineExceeded { budget_ms: u64 },
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("dispatch overloaded, try again later")]
    Overloaded,
    #[error("handler panicked: {message}")]
    Panic { message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SedError {
    /// A business error with an explicit code.
    #[must_use]
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Business {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Converts a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panic { message }
    }

    /// Wire error code of this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::HandlerNotFound { .. } | Self::PathNotFound { .. } => codes::HANDLER_NOT_FOUND,
            Self::Decode(_) => codes::DECODE,
            Self::Encode(_) => codes::ENCODE,
            Self::Validation { .. } => codes::VALIDATION,
            Self::Business { code, .. } => code.as_str(),
            Self::Branch { code, .. } => *code,
            Self::RemoteTimeout { .. } | Self::DeadlineExceeded { .. } => codes::REMOTE_TIMEOUT,
            Self::RemoteConnection { .. } | Self::RemoteRejected { .. } => codes::REMOTE_CONNECTION,
            Self::CircuitOpen { .. } => codes::CIRCUIT_OPEN,
            Self::Cancelled => codes::CANCELLED,
            Self::Overloaded => codes::OVERLOADED,
            Self::Panic { .. } | Self::Internal(_) => codes::INTERNAL,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HandlerNotFound { .. } | Self::PathNotFound { .. } => ErrorKind::Routing,
            Self::Decode(_) | Self::Encode(_) => ErrorKind::Codec,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Business { .. } => ErrorKind::Business,
            Self::Branch { .. } => ErrorKind::Branch,
            Self::RemoteTimeout { .. }
            | Self::RemoteConnection { .. }
            | Self::RemoteRejected { .. }
            | Self::CircuitOpen { .. } => ErrorKind::Remote,
            Self::DeadlineExceeded { .. }
            | Self::Cancelled
            | Self::Overloaded
            | Self::Panic { .. }
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Debug string rendered into the `{{detail}}` template slot.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Panic { message } => format!("panic: {message}"),
            other => format!("{other:?}"),
        }
    }

    /// Whether a remote call failing with this error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteConnection { .. })
    }
}

/// Failure of the outbound transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("wire codec: {0}")]
    Codec(String),
}

impl TransportError {
    /// Normalizes into the structured error handlers see.
    #[must_use]
    pub fn into_sed(self, target: &str, timeout_ms: u64) -> SedError {
        match self {
            Self::Timeout => SedError::RemoteTimeout {
                target: target.to_owned(),
                timeout_ms,
            },
            Self::Connection(_) => SedError::RemoteConnection {
                target: target.to_owned(),
                message: self.to_string(),
            },
            Self::Status(_) | Self::Codec(_) => SedError::RemoteRejected {
                target: target.to_owned(),
                message: self.to_string(),
            },
        }
    }
}

/// A route or compensable service that must not be accepted. The hosting
/// process treats any of these as fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("route pattern must not be empty")]
    EmptyPattern,
    #[error("duplicate route for event id {0}")]
    DuplicateRoute(String),
    #[error("duplicate route for url path {0}")]
    DuplicatePath(String),
    #[error("invalid route expression {pattern}: {source}")]
    InvalidExpression {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("method {method} takes {count} input parameters, at most one is allowed")]
    TooManyInputs { method: String, count: usize },
    #[error("compensable service {0} is already registered")]
    DuplicateCompensable(String),
    #[error("compensable service {service} is invalid: {}", .violations.join("; "))]
    InvalidCompensable {
        service: String,
        violations: Vec<String>,
    },
}
