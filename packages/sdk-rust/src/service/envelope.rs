//! Uniform error envelope rendering.

use std::sync::Arc;

use sedmesh_core::error::codes;
use sedmesh_core::{keys, Message};
use serde_json::Value;
use tracing::warn;

use super::context::CallContext;
use super::i18n::localize;
use crate::error::SedError;
use crate::traits::Translator;

/// Renders terminal dispatch errors into outbound messages.
///
/// The body is the configured error template with `{{code}}`,
/// `{{message}}` and `{{detail}}` substituted as JSON string contents; the
/// `errorCode` and `errorMsg` properties are always set. A template that does
/// not render to valid JSON is replaced by a minimal fallback body, so the
/// caller always receives a well-formed response.
#[derive(Clone)]
pub struct EnvelopeRenderer {
    translator: Arc<dyn Translator>,
}

impl std::fmt::Debug for EnvelopeRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeRenderer").finish_non_exhaustive()
    }
}

impl EnvelopeRenderer {
    #[must_use]
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }

    /// Writes `err` into `response` (body and error properties).
    pub fn render(&self, ctx: &CallContext, err: &SedError, combine_fields: bool, response: &mut Message) {
        let code = err.code();
        let localized = localize(self.translator.as_ref(), &ctx.language, err, combine_fields);
        let config = ctx.response_template();
        let detail = if config.expose_detail {
            err.detail()
        } else {
            String::new()
        };

        let body = render_template(
            &config.error_template,
            &[
                ("code", json_escape(code)),
                ("message", json_escape(&localized.message)),
                ("detail", json_escape(&detail)),
            ],
        );
        let body = if serde_json::from_str::<Value>(&body).is_ok() {
            body
        } else {
            warn!(code, "error template did not render to JSON, using fallback body");
            fallback_body(&localized.message)
        };

        response.payload = body.into_bytes();
        response.properties.insert(keys::ERROR_CODE, code);
        response.properties.insert(keys::ERROR_MSG, localized.message);
        if !combine_fields && localized.fields.len() > 1 {
            response
                .properties
                .insert(keys::ERROR_DETAIL, localized.fields.join("; "));
        }
    }
}

/// Minimal body used when the configured template is unusable.
#[must_use]
pub fn fallback_body(message: &str) -> String {
    serde_json::json!({
        "errorCode": codes::FALLBACK,
        "errorMsg": message,
    })
    .to_string()
}

/// Substitutes `{{name}}` slots in one pass; unknown slots are kept as is.
#[must_use]
pub fn render_template(template: &str, slots: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match slots.iter().find(|(slot, _)| *slot == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Contents of `s` as a JSON string literal, without the quotes.
#[must_use]
pub fn json_escape(s: &str) -> String {
    let quoted = Value::String(s.to_owned()).to_string();
    quoted[1..quoted.len() - 1].to_owned()
}
