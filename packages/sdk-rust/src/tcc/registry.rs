//! Compensable service registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BranchPhase, RegistrationError};
use crate::service::method::Method;

/// A Try method with its optional Confirm and Cancel counterparts.
#[derive(Debug, Clone)]
pub struct CompensableDescriptor {
    pub service_name: String,
    pub try_method: Method,
    pub confirm: Option<Method>,
    pub cancel: Option<Method>,
    pub is_propagator: bool,
}

impl CompensableDescriptor {
    #[must_use]
    pub fn new(service_name: impl Into<String>, try_method: Method) -> Self {
        Self {
            service_name: service_name.into(),
            try_method,
            confirm: None,
            cancel: None,
            is_propagator: false,
        }
    }

    #[must_use]
    pub fn with_confirm(mut self, method: Method) -> Self {
        self.confirm = Some(method);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, method: Method) -> Self {
        self.cancel = Some(method);
        self
    }

    #[must_use]
    pub fn propagator(mut self, is_propagator: bool) -> Self {
        self.is_propagator = is_propagator;
        self
    }

    /// Method resolving the given phase, if declared.
    #[must_use]
    pub fn phase_method(&self, phase: BranchPhase) -> Option<&Method> {
        match phase {
            BranchPhase::Confirm => self.confirm.as_ref(),
            BranchPhase::Cancel => self.cancel.as_ref(),
        }
    }

    /// Every structural problem of this descriptor; empty when valid.
    ///
    /// Confirm and Cancel must take the same inputs and return the same
    /// outputs as Try, and Try must end with an error output.
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let try_sig = self.try_method.signature();

        if self.service_name.trim().is_empty() {
            violations.push("service name is empty".to_string());
        }
        if try_sig.inputs.len() > 1 {
            violations.push(format!(
                "try method {} takes {} inputs, at most one is allowed",
                self.try_method.name(),
                try_sig.inputs.len()
            ));
        }
        if !try_sig.returns_error() {
            violations.push(format!(
                "try method {} must return an error as its last output",
                self.try_method.name()
            ));
        }

        for phase in [BranchPhase::Confirm, BranchPhase::Cancel] {
            let Some(method) = self.phase_method(phase) else {
                continue;
            };
            let sig = method.signature();
            if sig.inputs != try_sig.inputs {
                violations.push(format!(
                    "{phase} method {} input {sig} does not match try {try_sig}",
                    method.name()
                ));
            }
            if sig.outputs != try_sig.outputs {
                violations.push(format!(
                    "{phase} method {} output {sig} does not match try {try_sig}",
                    method.name()
                ));
            }
        }
        violations
    }
}

/// Table of compensable services, unique by name. Built mutably at startup
/// and frozen behind an `Arc` afterwards.
#[derive(Debug, Default)]
pub struct CompensableRegistry {
    services: HashMap<String, Arc<CompensableDescriptor>>,
}

impl CompensableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service after validating signature symmetry.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateCompensable` if the name is taken, or
    /// `InvalidCompensable` listing every violation of the descriptor.
    pub fn register(
        &mut self,
        descriptor: CompensableDescriptor,
    ) -> Result<Arc<CompensableDescriptor>, RegistrationError> {
        if self.services.contains_key(&descriptor.service_name) {
            return Err(RegistrationError::DuplicateCompensable(descriptor.service_name));
        }
        let violations = descriptor.violations();
        if !violations.is_empty() {
            return Err(RegistrationError::InvalidCompensable {
                service: descriptor.service_name,
                violations,
            });
        }

        debug!(service = %descriptor.service_name, "compensable service registered");
        let descriptor = Arc::new(descriptor);
        self.services
            .insert(descriptor.service_name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    #[must_use]
    pub fn lookup(&self, service_name: &str) -> Option<Arc<CompensableDescriptor>> {
        self.services.get(service_name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::error::SedError;

    #[derive(Debug, Serialize, Deserialize)]
    struct Request {
        amount: i64,
    }

    impl sedmesh_core::Validate for Request {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Response {
        ok: bool,
    }

    fn phase(name: &str) -> Method {
        Method::function(name, |_ctx, _req: Request| async { Ok(Response { ok: true }) })
    }

    #[test]
    fn symmetric_descriptor_registers() {
        let mut registry = CompensableRegistry::new();
        let descriptor = CompensableDescriptor::new("pay", phase("try"))
            .with_confirm(phase("confirm"))
            .with_cancel(phase("cancel"));

        registry.register(descriptor).unwrap();
        assert!(registry.lookup("pay").is_some());
        assert!(registry.lookup("refund").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn mismatched_cancel_input_is_rejected() {
        let mut registry = CompensableRegistry::new();
        let cancel = Method::function("cancel", |_ctx, _req: String| async { Ok(Response { ok: false }) });
        let descriptor = CompensableDescriptor::new("pay", phase("try"))
            .with_confirm(phase("confirm"))
            .with_cancel(cancel);

        let err = registry.register(descriptor).unwrap_err();
        match err {
            RegistrationError::InvalidCompensable { service, violations } => {
                assert_eq!(service, "pay");
                assert_eq!(violations.len(), 1);
                assert!(violations[0].starts_with("cancel method cancel input"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn every_violation_is_collected() {
        let try_sink = Method::sink("try", |_ctx, _req: Request| async {});
        let confirm = Method::consumer("confirm", |_ctx, _req: Request| async { Ok::<(), SedError>(()) });
        let descriptor = CompensableDescriptor::new(" ", try_sink).with_confirm(confirm);

        let violations = descriptor.violations();
        // empty name, try without error, confirm output mismatch
        assert_eq!(violations.len(), 3, "{violations:?}");
    }

    #[test]
    fn duplicate_service_name_is_rejected() {
        let mut registry = CompensableRegistry::new();
        registry
            .register(CompensableDescriptor::new("pay", phase("try")))
            .unwrap();
        let err = registry
            .register(CompensableDescriptor::new("pay", phase("try2")))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateCompensable(name) if name == "pay"));
    }
}
