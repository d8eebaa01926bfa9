//! Default wire codec and HTTP transport toward the broker.

use std::sync::Arc;
use std::time::Duration;

use sedmesh_core::Message;

use crate::error::TransportError;
use crate::traits::{Transport, WireCodec};

/// JSON envelope with a base64 payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWireCodec;

impl WireCodec for JsonWireCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(message).map_err(|e| TransportError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, TransportError> {
        serde_json::from_slice(bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }
}

/// Posts encoded messages to `{base_url}{path}` over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    codec: Arc<dyn WireCodec>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// A transport using the JSON wire codec.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_codec(base_url, Arc::new(JsonWireCodec))
    }

    #[must_use]
    pub fn with_codec(base_url: impl Into<String>, codec: Arc<dyn WireCodec>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            codec,
        }
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn post(&self, message: Message, path: &str, timeout: Duration) -> Result<Message, TransportError> {
        let body = self.codec.encode(&message)?;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .timeout(timeout)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await.map_err(|e| classify(&e))?;
        self.codec.decode(&bytes)
    }
}
