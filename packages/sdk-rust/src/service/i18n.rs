//! Translation of error messages into the caller's language.
//!
//! Catalog keys:
//! - `error.<code>`: message of an error code; `{message}` receives the raw text
//! - `validation.<rule>`: message of a field constraint; `{field}` and
//!   `{param}` receive the field path and constraint parameter
//!
//! Anything without a translation falls back to the raw error text.

use sedmesh_core::FieldError;

use super::config::ConfigHandle;
use crate::error::SedError;
use crate::traits::Translator;

/// Translator backed by the `messages` table of the live configuration, so
/// catalog updates apply on hot reload.
///
/// A regional language (`zh-CN`) falls back to its base language (`zh`).
#[derive(Debug, Clone)]
pub struct CatalogTranslator {
    config: ConfigHandle,
}

impl CatalogTranslator {
    #[must_use]
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }
}

impl Translator for CatalogTranslator {
    fn translate(&self, language: &str, key: &str) -> Option<String> {
        let config = self.config.load();
        let lookup = |lang: &str| config.messages.get(lang).and_then(|m| m.get(key)).cloned();
        lookup(language).or_else(|| {
            language
                .split_once(['-', '_'])
                .and_then(|(base, _)| lookup(base))
        })
    }
}

/// An error message in the caller's language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localized {
    pub message: String,
    /// One entry per field error, for validation errors.
    pub fields: Vec<String>,
}

/// Localizes `err`. Validation errors are combined into one message, or
/// reduced to the first field error when `combine` is false.
#[must_use]
pub fn localize(translator: &dyn Translator, language: &str, err: &SedError, combine: bool) -> Localized {
    if let SedError::Validation { errors } = err {
        let fields: Vec<String> = errors
            .iter()
            .map(|fe| field_message(translator, language, fe))
            .collect();
        let message = if combine {
            fields.join("; ")
        } else {
            fields.first().cloned().unwrap_or_else(|| err.to_string())
        };
        return Localized { message, fields };
    }

    let raw = err.to_string();
    let message = translator
        .translate(language, &format!("error.{}", err.code()))
        .map_or_else(|| raw.clone(), |t| t.replace("{message}", &raw));
    Localized {
        message,
        fields: Vec::new(),
    }
}

fn field_message(translator: &dyn Translator, language: &str, fe: &FieldError) -> String {
    match translator.translate(language, &format!("validation.{}", fe.rule)) {
        Some(template) => template
            .replace("{field}", &fe.field)
            .replace("{param}", fe.param.as_deref().unwrap_or_default()),
        None => fe.to_string(),
    }
}
