//! Body codecs used to turn a message payload into a handler's input type
//! and a handler's output back into a payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Payload encoding of a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    /// Named MessagePack (`rmp_serde::to_vec_named`).
    MsgPack,
}

/// Failure to encode or decode a body.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack decode: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("msgpack encode: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
}

impl Codec {
    /// Decodes `payload` into `T`.
    ///
    /// An empty payload is decoded as JSON `null`, so optional or unit inputs
    /// accept a bodiless request.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the payload is not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(self, payload: &[u8]) -> Result<T, CodecError> {
        if payload.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        match self {
            Self::Json => Ok(serde_json::from_slice(payload)?),
            Self::MsgPack => Ok(rmp_serde::from_slice(payload)?),
        }
    }

    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if `value` cannot be represented in this format.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(value)?),
            Self::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    /// Content type advertised for this codec.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MsgPack => "application/msgpack",
        }
    }
}
