//! Transaction id propagation stage.

use async_trait::async_trait;
use sedmesh_core::{keys, Message, TxContext};

use super::chain::{Interceptor, PostHandled, PreHandled};
use crate::error::SedError;
use crate::service::context::CallContext;

/// Lifts root/parent/branch transaction ids from inbound properties into
/// the context, and echoes the branch id on the response.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionInterceptor;

#[async_trait]
impl Interceptor for TransactionInterceptor {
    fn name(&self) -> &str {
        "transaction"
    }

    async fn pre_handle(&self, ctx: &CallContext, request: &Message) -> Result<PreHandled, SedError> {
        Ok(match TxContext::from_properties(&request.properties) {
            Some(tx) => PreHandled::WithContext(ctx.with_tx(Some(tx))),
            None => PreHandled::Continue,
        })
    }

    async fn post_handle(
        &self,
        ctx: &CallContext,
        _request: &Message,
        response: &Message,
        _error: Option<&SedError>,
    ) -> Result<PostHandled, SedError> {
        match &ctx.tx {
            Some(tx) if !response.properties.contains_key(keys::BRANCH_TX_ID) => {
                let mut echoed = response.clone();
                tx.inject(&mut echoed.properties);
                Ok(PostHandled::Replace(echoed))
            }
            _ => Ok(PostHandled::Continue),
        }
    }
}
