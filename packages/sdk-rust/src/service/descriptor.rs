//! Immutable handler descriptors produced at registration.

use std::sync::Arc;

use sedmesh_core::Codec;

use super::config::SdkConfig;
use super::method::Method;
use super::middleware::InterceptorChain;
use crate::tcc::CompensableDescriptor;

/// How a route pattern is compared with an inbound event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
    Suffix,
    /// Unanchored regular expression; anchor with `^...$` for a full match.
    Regex,
}

/// Direct HTTP reachability of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpBinding {
    pub path: String,
    /// `None` accepts any verb.
    pub method: Option<http::Method>,
}

/// Whether and how decoded requests are validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// No constraint checking.
    Skip,
    /// Validate; combine or split errors as configured.
    #[default]
    FromConfig,
    /// Validate; report every field error in one message.
    Combined,
    /// Validate; report the first field error, list all in the detail.
    PerField,
}

impl ValidationPolicy {
    #[must_use]
    pub fn enabled(self) -> bool {
        !matches!(self, Self::Skip)
    }

    /// Whether field errors are combined into one message.
    #[must_use]
    pub fn combine(self, config: &SdkConfig) -> bool {
        match self {
            Self::Skip | Self::FromConfig => config.validation.combine_errors,
            Self::Combined => true,
            Self::PerField => false,
        }
    }
}

/// Confirm/Cancel counterparts that make a route's method the Try phase of
/// a compensable service.
#[derive(Debug, Clone)]
pub struct CompensableBinding {
    pub service_name: String,
    pub confirm: Option<Method>,
    pub cancel: Option<Method>,
    /// Outbound calls of the Try phase carry the transaction ids downstream.
    pub is_propagator: bool,
}

impl CompensableBinding {
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            confirm: None,
            cancel: None,
            is_propagator: false,
        }
    }

    #[must_use]
    pub fn confirm(mut self, method: Method) -> Self {
        self.confirm = Some(method);
        self
    }

    #[must_use]
    pub fn cancel(mut self, method: Method) -> Self {
        self.cancel = Some(method);
        self
    }

    #[must_use]
    pub fn propagator(mut self) -> Self {
        self.is_propagator = true;
        self
    }
}

/// Per-route registration options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub codec: Codec,
    /// Interceptors of this route; `None` inherits the router defaults.
    pub interceptors: Option<InterceptorChain>,
    pub validation: ValidationPolicy,
    pub compensable: Option<CompensableBinding>,
    pub http: Option<HttpBinding>,
}

impl RouteOptions {
    #[must_use]
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn interceptors(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = Some(chain);
        self
    }

    #[must_use]
    pub fn validation(mut self, policy: ValidationPolicy) -> Self {
        self.validation = policy;
        self
    }

    #[must_use]
    pub fn compensable(mut self, binding: CompensableBinding) -> Self {
        self.compensable = Some(binding);
        self
    }

    #[must_use]
    pub fn http(mut self, path: impl Into<String>, method: Option<http::Method>) -> Self {
        self.http = Some(HttpBinding {
            path: path.into(),
            method,
        });
        self
    }
}

/// Everything the executor needs to dispatch to one route. Shared
/// read-only across concurrent dispatches.
#[derive(Debug)]
pub struct HandlerDescriptor {
    pub kind: MatchKind,
    pub pattern: String,
    pub method: Method,
    pub codec: Codec,
    pub chain: InterceptorChain,
    pub validation: ValidationPolicy,
    pub compensable: Option<Arc<CompensableDescriptor>>,
    pub http: Option<HttpBinding>,
}

impl HandlerDescriptor {
    /// Whether the Try phase goes through the transaction proxy.
    #[must_use]
    pub fn is_compensable(&self) -> bool {
        self.compensable.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_policy_resolves_combine_mode() {
        let mut config = SdkConfig::default();
        assert!(ValidationPolicy::FromConfig.combine(&config));
        config.validation.combine_errors = false;
        assert!(!ValidationPolicy::FromConfig.combine(&config));
        assert!(ValidationPolicy::Combined.combine(&config));
        assert!(!ValidationPolicy::PerField.combine(&SdkConfig::default()));
        assert!(!ValidationPolicy::Skip.enabled());
    }

    #[test]
    fn options_builder() {
        let opts = RouteOptions::default()
            .codec(Codec::MsgPack)
            .validation(ValidationPolicy::PerField)
            .http("/orders", Some(http::Method::POST))
            .compensable(CompensableBinding::new("orders").propagator());

        assert_eq!(opts.codec, Codec::MsgPack);
        assert_eq!(opts.http.as_ref().map(|h| h.path.as_str()), Some("/orders"));
        assert!(opts.compensable.as_ref().is_some_and(|c| c.is_propagator));
        assert!(opts.interceptors.is_none());
    }
}
