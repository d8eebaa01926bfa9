//! Transaction proxy around compensable Try calls.

use std::sync::Arc;

use sedmesh_core::{Codec, TxContext};
use tracing::debug;

use super::ledger::BranchLedger;
use super::registry::CompensableDescriptor;
use crate::service::context::CallContext;

/// Wraps the Try invocation of a compensable route.
///
/// The proxy does not commit anything itself: it opens a branch under the
/// caller's transaction (or a new root), records the branch as `Tried` with
/// its raw params, and hands back the transactional context the Try method
/// runs with. Confirm and Cancel arrive later from the coordinator.
#[derive(Debug, Clone)]
pub struct TransactionProxy {
    ledger: Arc<BranchLedger>,
}

impl TransactionProxy {
    #[must_use]
    pub fn new(ledger: Arc<BranchLedger>) -> Self {
        Self { ledger }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<BranchLedger> {
        &self.ledger
    }

    /// Opens and records the branch; returns the context of the Try call.
    #[must_use]
    pub fn begin(
        &self,
        ctx: &CallContext,
        descriptor: &CompensableDescriptor,
        codec: Codec,
        params: &[u8],
    ) -> CallContext {
        let mut tx = ctx.tx.as_ref().map_or_else(TxContext::root, TxContext::branch);
        tx.propagate = descriptor.is_propagator;

        self.ledger.record_try(
            &tx.branch_tx_id,
            &descriptor.service_name,
            &tx.root_tx_id,
            params.to_vec(),
            codec,
        );
        debug!(
            service = %descriptor.service_name,
            root_tx_id = %tx.root_tx_id,
            branch_tx_id = %tx.branch_tx_id,
            "branch tried"
        );
        ctx.with_tx(Some(tx))
    }

    /// Flags the branch opened for `ctx` as failed so the ledger only keeps
    /// it for the resolved retention.
    pub fn try_failed(&self, ctx: &CallContext) {
        if let Some(tx) = &ctx.tx {
            self.ledger.mark_try_failed(&tx.branch_tx_id);
            debug!(branch_tx_id = %tx.branch_tx_id, "branch try failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::config::SdkConfig;
    use crate::service::method::Method;
    use crate::tcc::ledger::BranchState;

    fn descriptor(propagator: bool) -> CompensableDescriptor {
        let try_method = Method::procedure("try", |_ctx| async { Ok(()) });
        CompensableDescriptor::new("pay", try_method).propagator(propagator)
    }

    fn ctx() -> CallContext {
        CallContext::detached(Arc::new(SdkConfig::default()), Duration::from_secs(1))
    }

    #[test]
    fn root_branch_is_allocated_and_recorded() {
        let proxy = TransactionProxy::new(Arc::new(BranchLedger::new()));
        let tx_ctx = proxy.begin(&ctx(), &descriptor(false), Codec::Json, b"{}");

        let tx = tx_ctx.tx.clone().unwrap();
        assert!(!tx.propagate);
        assert_eq!(tx.root_tx_id, tx.branch_tx_id);

        let record = proxy.ledger().get(&tx.branch_tx_id).unwrap();
        assert_eq!(record.state, BranchState::Tried);
        assert_eq!(record.params, b"{}");
        assert_eq!(record.service_name, "pay");
    }

    #[test]
    fn inbound_transaction_gets_a_child_branch() {
        let proxy = TransactionProxy::new(Arc::new(BranchLedger::new()));
        let parent = TxContext::root();
        let inbound = ctx().with_tx(Some(parent.clone()));

        let tx = proxy
            .begin(&inbound, &descriptor(true), Codec::Json, b"{}")
            .tx
            .unwrap();
        assert_eq!(tx.root_tx_id, parent.root_tx_id);
        assert_eq!(tx.parent_tx_id, parent.branch_tx_id);
        assert_ne!(tx.branch_tx_id, parent.branch_tx_id);
        assert!(tx.propagate);
    }
}
