//! Success response template stage.

use async_trait::async_trait;
use sedmesh_core::error::codes;
use sedmesh_core::Message;
use serde_json::Value;
use tracing::warn;

use super::chain::{Interceptor, PostHandled};
use crate::error::SedError;
use crate::service::context::CallContext;
use crate::service::envelope::{json_escape, render_template};

/// Wraps successful JSON bodies with the configured success template. The
/// `{{data}}` slot receives the raw body; `{{code}}` and `{{message}}` the
/// success code and an empty message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTemplateInterceptor;

#[async_trait]
impl Interceptor for ResponseTemplateInterceptor {
    fn name(&self) -> &str {
        "response_template"
    }

    async fn post_handle(
        &self,
        ctx: &CallContext,
        _request: &Message,
        response: &Message,
        error: Option<&SedError>,
    ) -> Result<PostHandled, SedError> {
        if error.is_some() {
            return Ok(PostHandled::Continue);
        }
        let Some(template) = &ctx.response_template().success_template else {
            return Ok(PostHandled::Continue);
        };

        let data = if response.payload.is_empty() {
            "null".to_string()
        } else if serde_json::from_slice::<Value>(&response.payload).is_ok() {
            String::from_utf8_lossy(&response.payload).into_owned()
        } else {
            // Binary bodies are left as they are.
            return Ok(PostHandled::Continue);
        };

        let body = render_template(
            template,
            &[
                ("code", json_escape(codes::SUCCESS)),
                ("message", String::new()),
                ("data", data),
            ],
        );
        if serde_json::from_str::<Value>(&body).is_err() {
            warn!(event_id = %ctx.event_id, "success template did not render to JSON, body left unwrapped");
            return Ok(PostHandled::Continue);
        }

        let mut wrapped = response.clone();
        wrapped.payload = body.into_bytes();
        Ok(PostHandled::Replace(wrapped))
    }
}
