//! Error codes and field-level validation results shared by every layer.

use serde::{Deserialize, Serialize};

/// String error codes carried in the `errorCode` property.
pub mod codes {
    pub const SUCCESS: &str = "0";
    /// Substituted when the configured template cannot be rendered.
    pub const FALLBACK: &str = "-1";
    pub const BUSINESS: &str = "10000";
    pub const DECODE: &str = "10400";
    pub const HANDLER_NOT_FOUND: &str = "10404";
    pub const VALIDATION: &str = "10422";
    pub const OVERLOADED: &str = "10429";
    pub const CANCELLED: &str = "10499";
    pub const ENCODE: &str = "10500";
    pub const REMOTE_CONNECTION: &str = "10503";
    pub const REMOTE_TIMEOUT: &str = "10504";
    pub const CIRCUIT_OPEN: &str = "10529";
    pub const INTERNAL: &str = "10599";
    pub const BRANCH_CONFIRM_FAILED: &str = "10601";
    pub const BRANCH_CANCEL_FAILED: &str = "10602";
    pub const BRANCH_NOT_FOUND: &str = "10604";
    pub const BRANCH_STATE_CONFLICT: &str = "10609";
}

/// A single constraint violation reported by request validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Constraint name (`required`, `max`, `email`, ...). Used as the
    /// translation key suffix.
    pub rule: String,
    /// Constraint parameter, e.g. the limit of `max`.
    pub param: Option<String>,
    /// Untranslated fallback message.
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
            param: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of validating a decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The value satisfies every constraint.
    Valid,
    /// The value violates one or more constraints.
    Invalid {
        errors: Vec<FieldError>,
    },
}

impl ValidationResult {
    /// Builds a result from a list of violations; empty means valid.
    #[must_use]
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::Invalid { errors }
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Constraint checking implemented by request types.
///
/// Types without constraints implement it with the default body.
pub trait Validate {
    fn validate(&self) -> ValidationResult {
        ValidationResult::Valid
    }
}

impl Validate for () {}
impl Validate for String {}
impl Validate for serde_json::Value {}
impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> ValidationResult {
        self.as_ref().map_or(ValidationResult::Valid, Validate::validate)
    }
}
impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> ValidationResult {
        let errors = self
            .iter()
            .enumerate()
            .flat_map(|(i, item)| match item.validate() {
                ValidationResult::Valid => Vec::new(),
                ValidationResult::Invalid { errors } => errors
                    .into_iter()
                    .map(|mut e| {
                        e.field = format!("[{i}].{}", e.field);
                        e
                    })
                    .collect(),
            })
            .collect();
        ValidationResult::from_errors(errors)
    }
}
