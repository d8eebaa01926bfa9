//! Transport-agnostic message envelope exchanged with the event-mesh broker.
//!
//! A `Message` is owned by exactly one pipeline stage at a time and is moved,
//! never shared, between stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::keys;

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Free-form header map.
///
/// Keys are stored and compared case-sensitively. `get_ignore_case` is a
/// convenience for peers that do not normalize header casing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-key lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Exact-key lookup first, then the first key equal ignoring ASCII case.
    #[must_use]
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        })
    }

    /// Returns the value only when present and non-empty.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get_ignore_case(key).filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Copies every entry of `other` into `self`, overwriting existing keys.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ---------------------------------------------------------------------------
// TopicAttributes
// ---------------------------------------------------------------------------

/// Routing metadata of a message (topic type/id, source and destination
/// org/workspace/env/SU/node/instance). See [`keys::topic`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicAttributes(BTreeMap<String, String>);

impl TopicAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value of `key`, or the empty string.
    #[must_use]
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// The event id this message is addressed to.
    #[must_use]
    pub fn topic_id(&self) -> &str {
        self.get_or_empty(keys::topic::TOPIC_ID)
    }

    #[must_use]
    pub fn topic_type(&self) -> &str {
        self.get_or_empty(keys::topic::TOPIC_TYPE)
    }

    /// Attributes for a reply: source and destination swapped, topic kept.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut out = self.clone();
        for (src, dst) in keys::topic::PAIRS {
            match self.get(dst) {
                Some(v) => out.set(src, v),
                None => {
                    out.0.remove(src);
                }
            }
            match self.get(src) {
                Some(v) => out.set(dst, v),
                None => {
                    out.0.remove(dst);
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single inbound or outbound exchange with the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Correlation id; replies carry the id of the request.
    pub id: u64,
    pub topic: TopicAttributes,
    pub properties: Properties,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    pub need_reply: bool,
    pub need_ack: bool,
}

impl Message {
    /// Creates a request addressed to `event_id`.
    #[must_use]
    pub fn request(id: u64, event_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            topic: TopicAttributes::new().with(keys::topic::TOPIC_ID, event_id),
            payload,
            need_reply: true,
            ..Self::default()
        }
    }

    /// Creates an empty reply to `self`: same id and topic, swapped routing.
    #[must_use]
    pub fn reply(&self) -> Self {
        Self {
            id: self.id,
            topic: self.topic.reversed(),
            properties: Properties::new(),
            payload: Vec::new(),
            need_reply: false,
            need_ack: false,
        }
    }

    #[must_use]
    pub fn event_id(&self) -> &str {
        self.topic.topic_id()
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Returns the error code of a response, if the response carries a
    /// non-success one.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.properties
            .non_empty(keys::ERROR_CODE)
            .filter(|code| *code != crate::error::codes::SUCCESS)
    }

    #[must_use]
    pub fn is_semi_sync(&self) -> bool {
        self.properties
            .get_ignore_case(keys::CALL_TYPE)
            .is_some_and(|t| t.eq_ignore_ascii_case(keys::call_type::SEMI_SYNC))
    }
}

/// Payload bytes travel as standard base64 in self-describing formats.
mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
