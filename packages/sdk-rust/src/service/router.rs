//! Route table: resolves an inbound event id or URL path to exactly one
//! handler descriptor.
//!
//! Exact ids are a direct key lookup and always win. Prefix, suffix and
//! regular-expression entries are then tried in registration order and the
//! first structural match wins, so resolution is deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::info;

use super::descriptor::{HandlerDescriptor, HttpBinding, MatchKind, RouteOptions};
use super::method::Method;
use super::middleware::InterceptorRegistry;
use crate::error::RegistrationError;
use crate::tcc::{CompensableDescriptor, CompensableRegistry};

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Matcher {
    Prefix(String),
    Suffix(String),
    Regex(Regex),
}

impl Matcher {
    fn matches(&self, event_id: &str) -> bool {
        match self {
            Self::Prefix(p) => event_id.starts_with(p.as_str()),
            Self::Suffix(s) => event_id.ends_with(s.as_str()),
            Self::Regex(re) => re.is_match(event_id),
        }
    }
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

/// Frozen route table; read concurrently without locks.
#[derive(Debug, Default)]
pub struct RouteTable {
    exact: HashMap<String, Arc<HandlerDescriptor>>,
    patterns: Vec<(Matcher, Arc<HandlerDescriptor>)>,
    paths: HashMap<String, Vec<Arc<HandlerDescriptor>>>,
}

impl RouteTable {
    /// Descriptor of an event id: exact first, then patterns in
    /// registration order.
    #[must_use]
    pub fn match_event(&self, event_id: &str) -> Option<Arc<HandlerDescriptor>> {
        if let Some(descriptor) = self.exact.get(event_id) {
            return Some(Arc::clone(descriptor));
        }
        self.patterns
            .iter()
            .find(|(matcher, _)| matcher.matches(event_id))
            .map(|(_, descriptor)| Arc::clone(descriptor))
    }

    /// Descriptor bound to a URL path. A binding with a verb only matches
    /// that verb; one without a verb matches any.
    #[must_use]
    pub fn match_path(&self, path: &str, method: Option<&http::Method>) -> Option<Arc<HandlerDescriptor>> {
        let candidates = self.paths.get(path)?;
        candidates
            .iter()
            .find(|d| {
                let bound = d.http.as_ref().and_then(|h| h.method.as_ref());
                match (bound, method) {
                    (Some(bound), Some(method)) => bound == method,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            })
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Routes / RouterBuilder
// ---------------------------------------------------------------------------

/// Immutable result of registration: the route table and the compensable
/// registry, shared by every dispatch.
#[derive(Debug, Clone, Default)]
pub struct Routes {
    pub table: Arc<RouteTable>,
    pub compensables: Arc<CompensableRegistry>,
}

/// Collects registrations at startup. Every registration returns a result;
/// the hosting process treats any error as fatal.
#[derive(Debug)]
pub struct RouterBuilder {
    table: RouteTable,
    compensables: CompensableRegistry,
    interceptors: InterceptorRegistry,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// A builder whose routes inherit the built-in interceptors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_interceptors(InterceptorRegistry::defaults())
    }

    #[must_use]
    pub fn with_interceptors(interceptors: InterceptorRegistry) -> Self {
        Self {
            table: RouteTable::default(),
            compensables: CompensableRegistry::new(),
            interceptors,
        }
    }

    /// Default interceptors of routes registered from now on.
    pub fn interceptors_mut(&mut self) -> &mut InterceptorRegistry {
        &mut self.interceptors
    }

    /// Registers a route.
    ///
    /// # Errors
    ///
    /// Fails on an empty pattern, an invalid regular expression, a method
    /// with more than one input, a duplicate exact id or HTTP binding, or an
    /// invalid compensable binding. A failed registration leaves the builder
    /// unchanged.
    pub fn register(
        &mut self,
        kind: MatchKind,
        pattern: &str,
        method: Method,
        options: RouteOptions,
    ) -> Result<Arc<HandlerDescriptor>, RegistrationError> {
        if pattern.is_empty() {
            return Err(RegistrationError::EmptyPattern);
        }
        let inputs = method.signature().inputs.len();
        if inputs > 1 {
            return Err(RegistrationError::TooManyInputs {
                method: method.name().to_owned(),
                count: inputs,
            });
        }
        let matcher = match kind {
            MatchKind::Exact => {
                if self.table.exact.contains_key(pattern) {
                    return Err(RegistrationError::DuplicateRoute(pattern.to_owned()));
                }
                None
            }
            MatchKind::Prefix => Some(Matcher::Prefix(pattern.to_owned())),
            MatchKind::Suffix => Some(Matcher::Suffix(pattern.to_owned())),
            MatchKind::Regex => Some(Matcher::Regex(Regex::new(pattern).map_err(|source| {
                RegistrationError::InvalidExpression {
                    pattern: pattern.to_owned(),
                    source,
                }
            })?)),
        };
        if let Some(binding) = &options.http {
            self.check_path(binding)?;
        }

        let compensable = match options.compensable {
            Some(binding) => {
                let mut descriptor = CompensableDescriptor::new(binding.service_name, method.clone())
                    .propagator(binding.is_propagator);
                descriptor.confirm = binding.confirm;
                descriptor.cancel = binding.cancel;
                Some(self.compensables.register(descriptor)?)
            }
            None => None,
        };

        let descriptor = Arc::new(HandlerDescriptor {
            kind,
            pattern: pattern.to_owned(),
            method,
            codec: options.codec,
            chain: options
                .interceptors
                .unwrap_or_else(|| self.interceptors.snapshot()),
            validation: options.validation,
            compensable,
            http: options.http,
        });

        match matcher {
            None => {
                self.table
                    .exact
                    .insert(pattern.to_owned(), Arc::clone(&descriptor));
            }
            Some(matcher) => self.table.patterns.push((matcher, Arc::clone(&descriptor))),
        }
        if let Some(binding) = &descriptor.http {
            self.table
                .paths
                .entry(binding.path.clone())
                .or_default()
                .push(Arc::clone(&descriptor));
        }

        info!(
            pattern,
            kind = ?kind,
            method = descriptor.method.name(),
            interceptors = ?descriptor.chain.names(),
            compensable = descriptor.is_compensable(),
            "route registered"
        );
        Ok(descriptor)
    }

    /// Registers an exact event id with default options.
    ///
    /// # Errors
    ///
    /// See [`RouterBuilder::register`].
    pub fn exact(&mut self, event_id: &str, method: Method) -> Result<Arc<HandlerDescriptor>, RegistrationError> {
        self.register(MatchKind::Exact, event_id, method, RouteOptions::default())
    }

    /// Registers a compensable service reachable only through the branch
    /// invoker.
    ///
    /// # Errors
    ///
    /// See [`CompensableRegistry::register`].
    pub fn register_compensable(
        &mut self,
        descriptor: CompensableDescriptor,
    ) -> Result<Arc<CompensableDescriptor>, RegistrationError> {
        self.compensables.register(descriptor)
    }

    /// Freezes the registrations.
    #[must_use]
    pub fn build(self) -> Routes {
        Routes {
            table: Arc::new(self.table),
            compensables: Arc::new(self.compensables),
        }
    }

    fn check_path(&self, binding: &HttpBinding) -> Result<(), RegistrationError> {
        let taken = self.table.paths.get(&binding.path).is_some_and(|existing| {
            existing
                .iter()
                .any(|d| d.http.as_ref().is_some_and(|h| h.method == binding.method))
        });
        if taken {
            return Err(RegistrationError::DuplicatePath(binding.path.clone()));
        }
        Ok(())
    }
}
