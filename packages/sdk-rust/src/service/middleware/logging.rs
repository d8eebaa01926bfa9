//! Structured request/response logging with field masking.

use async_trait::async_trait;
use sedmesh_core::Message;
use serde_json::Value;
use tracing::{info, warn};

use super::chain::{Interceptor, PostHandled, PreHandled};
use crate::error::SedError;
use crate::service::config::LoggingConfig;
use crate::service::context::CallContext;

const MASK: &str = "***";

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    async fn pre_handle(&self, ctx: &CallContext, request: &Message) -> Result<PreHandled, SedError> {
        let body = loggable_body(&request.payload, &ctx.config().logging);
        info!(
            event_id = %ctx.event_id,
            trace_id = %ctx.trace.trace_id,
            span_id = %ctx.trace.span_id,
            lang = %ctx.language,
            body = body.as_deref().unwrap_or_default(),
            "request received"
        );
        Ok(PreHandled::Continue)
    }

    async fn post_handle(
        &self,
        ctx: &CallContext,
        _request: &Message,
        response: &Message,
        error: Option<&SedError>,
    ) -> Result<PostHandled, SedError> {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        match error {
            None => {
                let body = loggable_body(&response.payload, &ctx.config().logging);
                info!(
                    event_id = %ctx.event_id,
                    trace_id = %ctx.trace.trace_id,
                    elapsed_ms,
                    body = body.as_deref().unwrap_or_default(),
                    "request handled"
                );
            }
            Some(e) => warn!(
                event_id = %ctx.event_id,
                trace_id = %ctx.trace.trace_id,
                elapsed_ms,
                code = e.code(),
                kind = e.kind().as_str(),
                error = %e,
                "request failed"
            ),
        }
        Ok(PostHandled::Continue)
    }
}

/// Body as it may appear in logs: masked JSON, or a size marker for
/// non-JSON payloads. `None` when body logging is off.
fn loggable_body(payload: &[u8], config: &LoggingConfig) -> Option<String> {
    if !config.log_bodies {
        return None;
    }
    let text = match serde_json::from_slice::<Value>(payload) {
        Ok(mut value) => {
            mask_fields(&mut value, &config.masked_fields);
            value.to_string()
        }
        Err(_) if payload.is_empty() => String::new(),
        Err(_) => format!("<{} bytes>", payload.len()),
    };
    Some(truncate(text, config.max_body_len))
}

/// Replaces the value of every key named in `fields`, at any depth,
/// compared case-insensitively.
pub fn mask_fields(value: &mut Value, fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                    *v = Value::String(MASK.to_string());
                } else {
                    mask_fields(v, fields);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| mask_fields(v, fields)),
        _ => {}
    }
}

fn truncate(mut text: String, max_len: usize) -> String {
    if text.len() <= max_len {
        return text;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("...");
    text
}
