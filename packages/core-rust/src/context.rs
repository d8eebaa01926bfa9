use crate::keys;
use crate::message::{Properties, TopicAttributes};

/// Trace identity of a single hop, propagated across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceContext {
    /// Distributed trace identifier shared by every hop of a call tree.
    pub trace_id: String,
    /// Identifier of this hop.
    pub span_id: String,
    /// Identifier of the calling hop. Empty at the root.
    pub parent_span_id: String,
}

impl TraceContext {
    /// Reads trace identity from inbound properties, synthesizing whatever is
    /// missing.
    ///
    /// A missing trace id is derived deterministically from the source
    /// org/workspace/env/SU/instance attributes and the correlation id, so
    /// retries of the same message land in the same trace.
    #[must_use]
    pub fn from_inbound(properties: &Properties, topic: &TopicAttributes, correlation_id: u64) -> Self {
        let trace_id = properties
            .non_empty(keys::TRACE_ID)
            .map_or_else(|| synthesize_trace_id(topic, correlation_id), str::to_owned);
        let span_id = properties
            .non_empty(keys::SPAN_ID)
            .map_or_else(|| derive_span_id(&trace_id, correlation_id), str::to_owned);
        let parent_span_id = properties
            .non_empty(keys::PARENT_SPAN_ID)
            .unwrap_or_default()
            .to_owned();
        Self {
            trace_id,
            span_id,
            parent_span_id,
        }
    }

    /// Trace identity of an outbound call made from this hop.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: self.span_id.clone(),
        }
    }

    /// Writes the identity into outbound properties.
    pub fn inject(&self, properties: &mut Properties) {
        properties.insert(keys::TRACE_ID, self.trace_id.clone());
        properties.insert(keys::SPAN_ID, self.span_id.clone());
        if !self.parent_span_id.is_empty() {
            properties.insert(keys::PARENT_SPAN_ID, self.parent_span_id.clone());
        }
    }
}

/// 32 hex chars of BLAKE3 over the source identity and correlation id.
#[must_use]
pub fn synthesize_trace_id(topic: &TopicAttributes, correlation_id: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    for key in [
        keys::topic::SRC_ORG,
        keys::topic::SRC_WORKSPACE,
        keys::topic::SRC_ENV,
        keys::topic::SRC_SU,
        keys::topic::SRC_INSTANCE,
    ] {
        hasher.update(topic.get_or_empty(key).as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.update(&correlation_id.to_be_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

fn derive_span_id(trace_id: &str, correlation_id: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(trace_id.as_bytes());
    hasher.update(&correlation_id.to_be_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..8])
}

/// Random 16 hex char span id.
#[must_use]
pub fn new_span_id() -> String {
    let id = uuid::Uuid::new_v4();
    hex::encode(&id.as_bytes()[..8])
}

/// Transaction identity of a compensable call tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxContext {
    /// Id of the global transaction (the first Try of the tree).
    pub root_tx_id: String,
    /// Branch id of the caller. Empty at the root.
    pub parent_tx_id: String,
    /// Branch id of the current hop.
    pub branch_tx_id: String,
    /// Whether outbound calls carry the transaction ids downstream.
    pub propagate: bool,
}

impl TxContext {
    /// Lifts transaction ids from inbound properties. `None` when the call is
    /// not part of a transaction.
    #[must_use]
    pub fn from_properties(properties: &Properties) -> Option<Self> {
        let root_tx_id = properties.non_empty(keys::ROOT_TX_ID)?.to_owned();
        Some(Self {
            root_tx_id,
            parent_tx_id: properties
                .non_empty(keys::PARENT_TX_ID)
                .unwrap_or_default()
                .to_owned(),
            branch_tx_id: properties
                .non_empty(keys::BRANCH_TX_ID)
                .unwrap_or_default()
                .to_owned(),
            propagate: true,
        })
    }

    /// Starts a new global transaction rooted at this hop.
    #[must_use]
    pub fn root() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            root_tx_id: id.clone(),
            parent_tx_id: String::new(),
            branch_tx_id: id,
            propagate: true,
        }
    }

    /// A new branch under `self`.
    #[must_use]
    pub fn branch(&self) -> Self {
        Self {
            root_tx_id: self.root_tx_id.clone(),
            parent_tx_id: self.branch_tx_id.clone(),
            branch_tx_id: uuid::Uuid::new_v4().to_string(),
            propagate: self.propagate,
        }
    }

    pub fn inject(&self, properties: &mut Properties) {
        properties.insert(keys::ROOT_TX_ID, self.root_tx_id.clone());
        properties.insert(keys::BRANCH_TX_ID, self.branch_tx_id.clone());
        if !self.parent_tx_id.is_empty() {
            properties.insert(keys::PARENT_TX_ID, self.parent_tx_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicAttributes {
        TopicAttributes::new()
            .with(keys::topic::SRC_ORG, "org")
            .with(keys::topic::SRC_WORKSPACE, "ws")
            .with(keys::topic::SRC_ENV, "prod")
            .with(keys::topic::SRC_SU, "su1")
            .with(keys::topic::SRC_INSTANCE, "i-1")
    }

    #[test]
    fn inbound_ids_are_kept() {
        let props: Properties = [(keys::TRACE_ID, "t"), (keys::SPAN_ID, "s"), (keys::PARENT_SPAN_ID, "p")]
            .into_iter()
            .collect();
        let trace = TraceContext::from_inbound(&props, &topic(), 1);
        assert_eq!(trace.trace_id, "t");
        assert_eq!(trace.span_id, "s");
        assert_eq!(trace.parent_span_id, "p");
    }

    #[test]
    fn synthesized_trace_is_deterministic() {
        let a = TraceContext::from_inbound(&Properties::new(), &topic(), 42);
        let b = TraceContext::from_inbound(&Properties::new(), &topic(), 42);
        assert_eq!(a, b);
        assert_eq!(a.trace_id.len(), 32);
        assert_eq!(a.span_id.len(), 16);
        assert!(a.parent_span_id.is_empty());

        let other = TraceContext::from_inbound(&Properties::new(), &topic(), 43);
        assert_ne!(a.trace_id, other.trace_id);
    }

    #[test]
    fn child_links_to_parent_span() {
        let parent = TraceContext::from_inbound(&Properties::new(), &topic(), 1);
        let child = parent.child();
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent_span_id, parent.span_id);
        assert_ne!(child.span_id, parent.span_id);
    }

    #[test]
    fn tx_context_requires_root_id() {
        assert!(TxContext::from_properties(&Properties::new()).is_none());

        let props: Properties = [(keys::ROOT_TX_ID, "root"), (keys::BRANCH_TX_ID, "b1")]
            .into_iter()
            .collect();
        let tx = TxContext::from_properties(&props).unwrap();
        assert_eq!(tx.root_tx_id, "root");
        assert_eq!(tx.branch_tx_id, "b1");

        let branch = tx.branch();
        assert_eq!(branch.root_tx_id, "root");
        assert_eq!(branch.parent_tx_id, "b1");
    }

    proptest::proptest! {
        #[test]
        fn synthesized_ids_are_fixed_width_hex(su in "[a-z0-9-]{0,12}", id in proptest::num::u64::ANY) {
            let topic = TopicAttributes::new().with(keys::topic::SRC_SU, su);
            let trace = TraceContext::from_inbound(&Properties::new(), &topic, id);
            proptest::prop_assert_eq!(trace.trace_id.len(), 32);
            proptest::prop_assert_eq!(trace.span_id.len(), 16);
            proptest::prop_assert!(trace.trace_id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
