//! Coordinator-driven Confirm and Cancel of compensable branches.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use sedmesh_core::error::codes;
use sedmesh_core::{keys, Codec, Message, TxContext};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ledger::{BranchLedger, Transition};
use super::registry::{CompensableDescriptor, CompensableRegistry};
use crate::error::{BranchPhase, SedError};
use crate::service::context::CallContext;

/// Body of a confirm or cancel request sent by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRequest {
    pub service_name: String,
    /// Branch to resolve. Falls back to the `branchTxId` property; without
    /// one the phase runs unconditionally and is not tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_tx_id: Option<String>,
    /// Try input, either as a JSON value or as a serialized JSON string.
    /// Absent means the params recorded when the branch was tried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Result of a branch resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchResponse {
    pub error_code: String,
    pub error_msg: String,
}

impl BranchResponse {
    fn from_result(result: &Result<(), SedError>) -> Self {
        match result {
            Ok(()) => Self {
                error_code: codes::SUCCESS.to_string(),
                error_msg: String::new(),
            },
            Err(e) => Self {
                error_code: e.code().to_string(),
                error_msg: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_code == codes::SUCCESS
    }
}

/// Resolves branches by calling the Confirm or Cancel method of their
/// compensable service.
///
/// Resolution is idempotent per tracked branch: the coordinator may deliver
/// the same request more than once.
#[derive(Debug, Clone)]
pub struct BranchInvoker {
    registry: Arc<CompensableRegistry>,
    ledger: Arc<BranchLedger>,
}

impl BranchInvoker {
    #[must_use]
    pub fn new(registry: Arc<CompensableRegistry>, ledger: Arc<BranchLedger>) -> Self {
        Self { registry, ledger }
    }

    pub async fn confirm(&self, ctx: &CallContext, request: BranchRequest) -> BranchResponse {
        self.resolve_logged(ctx, BranchPhase::Confirm, request).await
    }

    pub async fn cancel(&self, ctx: &CallContext, request: BranchRequest) -> BranchResponse {
        self.resolve_logged(ctx, BranchPhase::Cancel, request).await
    }

    /// Answers a coordinator message addressed to a reserved TCC event id.
    ///
    /// The reply carries `errorCode` (`0` on success) and, on failure, the
    /// `branchConfirmFailed` / `branchCancelFailed` marker.
    pub async fn handle_message(&self, ctx: &CallContext, phase: BranchPhase, inbound: &Message) -> Message {
        let ctx = ctx.with_tx(TxContext::from_properties(&inbound.properties));
        let response = match serde_json::from_slice::<BranchRequest>(&inbound.payload) {
            Ok(mut request) => {
                if request.branch_tx_id.is_none() {
                    request.branch_tx_id = inbound
                        .properties
                        .non_empty(keys::BRANCH_TX_ID)
                        .map(str::to_owned);
                }
                self.resolve_logged(&ctx, phase, request).await
            }
            Err(e) => {
                let err = SedError::Branch {
                    code: phase.failure_code(),
                    phase,
                    service: String::new(),
                    message: format!("malformed branch request: {e}"),
                };
                BranchResponse::from_result(&Err(err))
            }
        };

        let mut reply = inbound.reply();
        reply.properties.insert(keys::ERROR_CODE, response.error_code.clone());
        if !response.is_success() {
            reply.properties.insert(keys::ERROR_MSG, response.error_msg.clone());
            let marker = match phase {
                BranchPhase::Confirm => keys::BRANCH_CONFIRM_FAILED,
                BranchPhase::Cancel => keys::BRANCH_CANCEL_FAILED,
            };
            reply.properties.insert(marker, "true");
        }
        reply.payload = serde_json::to_vec(&response).unwrap_or_default();
        ctx.trace.inject(&mut reply.properties);
        reply
    }

    async fn resolve_logged(&self, ctx: &CallContext, phase: BranchPhase, request: BranchRequest) -> BranchResponse {
        let service = request.service_name.clone();
        let branch = request.branch_tx_id.clone().unwrap_or_default();
        let result = self.resolve(ctx, phase, request).await;
        match &result {
            Ok(()) => info!(%service, %branch, %phase, "branch resolved"),
            Err(e) => warn!(%service, %branch, %phase, code = e.code(), error = %e, "branch resolution failed"),
        }
        BranchResponse::from_result(&result)
    }

    async fn resolve(&self, ctx: &CallContext, phase: BranchPhase, request: BranchRequest) -> Result<(), SedError> {
        let service = request.service_name;
        let descriptor = self.registry.lookup(&service).ok_or_else(|| SedError::Branch {
            code: codes::BRANCH_NOT_FOUND,
            phase,
            service: service.clone(),
            message: "no compensable service registered under this name".to_string(),
        })?;

        let branch = request.branch_tx_id.filter(|id| !id.is_empty());
        let (stored, stored_codec) = match &branch {
            Some(id) => match self.ledger.begin(id, &service, phase)? {
                Transition::AlreadyDone => return Ok(()),
                Transition::Run { params, codec } => (params, codec),
            },
            None => (Vec::new(), Codec::Json),
        };

        let (payload, codec) = match request.params {
            Some(serde_json::Value::String(blob)) => (blob.into_bytes(), Codec::Json),
            Some(value) => (serde_json::to_vec(&value).unwrap_or_default(), Codec::Json),
            None => (stored, stored_codec),
        };

        let result = self.invoke(ctx, phase, &descriptor, codec, &payload).await;
        if let Some(id) = &branch {
            match &result {
                Ok(()) => self.ledger.complete(id, phase),
                Err(_) => self.ledger.abort(id, phase),
            }
        }
        result
    }

    async fn invoke(
        &self,
        ctx: &CallContext,
        phase: BranchPhase,
        descriptor: &CompensableDescriptor,
        codec: Codec,
        payload: &[u8],
    ) -> Result<(), SedError> {
        let failed = |message: String| SedError::Branch {
            code: phase.failure_code(),
            phase,
            service: descriptor.service_name.clone(),
            message,
        };

        let Some(method) = descriptor.phase_method(phase) else {
            return Ok(());
        };
        let input = method
            .decode(codec, payload)
            .map_err(|e| failed(e.to_string()))?;

        let call = AssertUnwindSafe(method.call(ctx.clone(), input)).catch_unwind();
        match tokio::time::timeout_at(ctx.deadline(), call).await {
            Ok(Ok(Ok(_output))) => Ok(()),
            Ok(Ok(Err(e))) => Err(failed(e.to_string())),
            Ok(Err(panic)) => Err(failed(SedError::from_panic(panic.as_ref()).to_string())),
            Err(_) => Err(failed("deadline exceeded".to_string())),
        }
    }
}
