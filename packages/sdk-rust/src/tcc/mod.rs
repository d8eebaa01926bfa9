//! Try-Confirm-Cancel compensable transactions.
//!
//! - [`registry`]: compensable services with signature-symmetry validation
//! - [`ledger`]: per-branch state machine
//! - [`proxy`]: opens branches around Try invocations
//! - [`invoker`]: resolves branches on coordinator callbacks

pub mod invoker;
pub mod ledger;
pub mod proxy;
pub mod registry;

pub use invoker::{BranchInvoker, BranchRequest, BranchResponse};
pub use ledger::{BranchLedger, BranchRecord, BranchState, LedgerRetention, Transition};
pub use proxy::TransactionProxy;
pub use registry::{CompensableDescriptor, CompensableRegistry};
