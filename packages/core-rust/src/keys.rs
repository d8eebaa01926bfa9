//! Well-known property and topic-attribute keys.
//!
//! Property keys are matched case-sensitively on the wire; the helpers on
//! [`Properties`](crate::message::Properties) offer case-insensitive lookups
//! for senders that do not normalize header casing.

/// Distributed trace identifier.
pub const TRACE_ID: &str = "traceId";
/// Span identifier of the current hop.
pub const SPAN_ID: &str = "spanId";
/// Span identifier of the calling hop.
pub const PARENT_SPAN_ID: &str = "parentSpanId";
/// Remaining time budget of the call, in milliseconds.
pub const REMAINING_TIMEOUT: &str = "remainingTimeout";
/// Default property carrying the caller's language.
pub const LANGUAGE: &str = "lang";
/// URL path for handlers reached over the direct HTTP surface.
pub const URL_PATH: &str = "urlPath";
/// HTTP verb for handlers reached over the direct HTTP surface.
pub const HTTP_METHOD: &str = "httpMethod";
/// Call mode of the inbound request (`sync`, `async`, `semisync`).
pub const CALL_TYPE: &str = "callType";

/// Error code of a failed response (`0` on success).
pub const ERROR_CODE: &str = "errorCode";
/// Human-readable (translated) error message.
pub const ERROR_MSG: &str = "errorMsg";
/// Debug detail (panic payload, error chain) of a failed response.
pub const ERROR_DETAIL: &str = "errorDetail";
/// Marker telling the transport to drop the response.
pub const DISCARD_RESPONSE: &str = "discardResponse";

/// Root transaction id of a compensable call tree.
pub const ROOT_TX_ID: &str = "rootTxId";
/// Transaction id of the calling branch.
pub const PARENT_TX_ID: &str = "parentTxId";
/// Transaction id of the current branch.
pub const BRANCH_TX_ID: &str = "branchTxId";
/// Set on a branch response when a confirm invocation failed.
pub const BRANCH_CONFIRM_FAILED: &str = "branchConfirmFailed";
/// Set on a branch response when a cancel invocation failed.
pub const BRANCH_CANCEL_FAILED: &str = "branchCancelFailed";

/// Call type values for [`CALL_TYPE`].
pub mod call_type {
    pub const SYNC: &str = "sync";
    pub const ASYNC: &str = "async";
    pub const SEMI_SYNC: &str = "semisync";
}

/// Topic attribute keys.
pub mod topic {
    pub const TOPIC_TYPE: &str = "topicType";
    pub const TOPIC_ID: &str = "topicId";

    pub const SRC_ORG: &str = "srcOrgId";
    pub const SRC_WORKSPACE: &str = "srcWorkspace";
    pub const SRC_ENV: &str = "srcEnv";
    pub const SRC_SU: &str = "srcSu";
    pub const SRC_NODE: &str = "srcNode";
    pub const SRC_INSTANCE: &str = "srcInstance";

    pub const DST_ORG: &str = "dstOrgId";
    pub const DST_WORKSPACE: &str = "dstWorkspace";
    pub const DST_ENV: &str = "dstEnv";
    pub const DST_SU: &str = "dstSu";
    pub const DST_NODE: &str = "dstNode";
    pub const DST_INSTANCE: &str = "dstInstance";

    /// Source/destination key pairs, swapped when building a reply.
    pub const PAIRS: [(&str, &str); 6] = [
        (SRC_ORG, DST_ORG),
        (SRC_WORKSPACE, DST_WORKSPACE),
        (SRC_ENV, DST_ENV),
        (SRC_SU, DST_SU),
        (SRC_NODE, DST_NODE),
        (SRC_INSTANCE, DST_INSTANCE),
    ];
}

/// Topic type values for [`topic::TOPIC_TYPE`].
pub mod topic_type {
    pub const EVENT: &str = "event";
    pub const RPC: &str = "rpc";
    pub const HEARTBEAT: &str = "heartbeat";
}
