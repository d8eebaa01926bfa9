//! In-memory branch ledger: the per-branch Try/Confirm/Cancel state machine.
//!
//! ```text
//! Tried --begin(Confirm)--> Confirming --complete--> Confirmed
//!   \                           |
//!    \                        abort --> Tried
//!     --begin(Cancel)--> Cancelling --complete--> Cancelled
//! ```
//!
//! Repeating a completed phase is a no-op success; resolving a branch in
//! the opposite phase is a conflict.
//!
//! Records do not live forever. Resolved branches, and branches whose Try
//! failed, are kept for the resolved retention so late coordinator retries
//! still see them; branches left in `Tried` expire after the pending TTL.
//! Branches with a phase in progress never expire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sedmesh_core::error::codes;
use sedmesh_core::Codec;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{BranchPhase, SedError};

/// State of one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Tried,
    Confirming,
    Confirmed,
    Cancelling,
    Cancelled,
}

impl BranchState {
    fn in_progress(phase: BranchPhase) -> Self {
        match phase {
            BranchPhase::Confirm => Self::Confirming,
            BranchPhase::Cancel => Self::Cancelling,
        }
    }

    fn done(phase: BranchPhase) -> Self {
        match phase {
            BranchPhase::Confirm => Self::Confirmed,
            BranchPhase::Cancel => Self::Cancelled,
        }
    }
}

/// A branch as recorded by the transaction proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub service_name: String,
    pub root_tx_id: String,
    pub state: BranchState,
    /// Try input as received, re-decoded for Confirm/Cancel.
    pub params: Vec<u8>,
    pub codec: Codec,
    /// The Try method returned an error.
    pub try_failed: bool,
    /// Last state change.
    pub touched_at: Instant,
}

impl BranchRecord {
    fn expired(&self, retention: &LedgerRetention, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.touched_at);
        match self.state {
            BranchState::Confirming | BranchState::Cancelling => false,
            BranchState::Confirmed | BranchState::Cancelled => idle >= retention.resolved,
            BranchState::Tried if self.try_failed => idle >= retention.resolved,
            BranchState::Tried => idle >= retention.pending,
        }
    }
}

/// How long branch records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRetention {
    /// Confirmed, cancelled and failed-Try branches.
    pub resolved: Duration,
    /// Branches still waiting for the coordinator.
    pub pending: Duration,
}

impl Default for LedgerRetention {
    fn default() -> Self {
        Self {
            resolved: Duration::from_secs(600),
            pending: Duration::from_secs(3_600),
        }
    }
}

/// Expired records are swept on every this many recorded Trys.
const SWEEP_EVERY: u64 = 256;

/// Outcome of starting a phase on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The phase method must run; call `complete` or `abort` afterwards.
    Run { params: Vec<u8>, codec: Codec },
    /// The phase already completed; nothing to run.
    AlreadyDone,
}

#[derive(Debug, Default)]
pub struct BranchLedger {
    branches: DashMap<String, BranchRecord>,
    retention: LedgerRetention,
    recorded: AtomicU64,
}

impl BranchLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retention(retention: LedgerRetention) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn retention(&self) -> LedgerRetention {
        self.retention
    }

    /// Records a branch as `Tried`. A retried Try of the same branch
    /// overwrites the stored params.
    pub fn record_try(
        &self,
        branch_tx_id: &str,
        service_name: &str,
        root_tx_id: &str,
        params: Vec<u8>,
        codec: Codec,
    ) {
        self.branches.insert(
            branch_tx_id.to_owned(),
            BranchRecord {
                service_name: service_name.to_owned(),
                root_tx_id: root_tx_id.to_owned(),
                state: BranchState::Tried,
                params,
                codec,
                try_failed: false,
                touched_at: Instant::now(),
            },
        );
        if self.recorded.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.purge_expired();
        }
    }

    /// Marks a branch whose Try returned an error. It stays resolvable
    /// (the coordinator usually cancels it) but only for the resolved
    /// retention.
    pub fn mark_try_failed(&self, branch_tx_id: &str) {
        if let Some(mut record) = self.branches.get_mut(branch_tx_id) {
            record.try_failed = true;
            record.touched_at = Instant::now();
        }
    }

    /// Drops expired records; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.branches.len();
        self.branches.retain(|_, record| !record.expired(&self.retention, now));
        let purged = before.saturating_sub(self.branches.len());
        if purged > 0 {
            debug!(purged, remaining = self.branches.len(), "expired branches purged");
        }
        purged
    }

    /// Moves a branch into the in-progress state of `phase`.
    ///
    /// # Errors
    ///
    /// Returns a `BRANCH_STATE_CONFLICT` branch error when the branch was
    /// never tried, belongs to another service, or is being or has been
    /// resolved in the other phase.
    pub fn begin(
        &self,
        branch_tx_id: &str,
        service_name: &str,
        phase: BranchPhase,
    ) -> Result<Transition, SedError> {
        let conflict = |message: String| SedError::Branch {
            code: codes::BRANCH_STATE_CONFLICT,
            phase,
            service: service_name.to_owned(),
            message,
        };

        let Entry::Occupied(mut entry) = self.branches.entry(branch_tx_id.to_owned()) else {
            return Err(conflict(format!("branch {branch_tx_id} was never tried")));
        };
        let record = entry.get_mut();
        if record.service_name != service_name {
            return Err(conflict(format!(
                "branch {branch_tx_id} belongs to {}",
                record.service_name
            )));
        }

        match record.state {
            BranchState::Tried => {
                record.state = BranchState::in_progress(phase);
                record.touched_at = Instant::now();
                Ok(Transition::Run {
                    params: record.params.clone(),
                    codec: record.codec,
                })
            }
            s if s == BranchState::done(phase) => Ok(Transition::AlreadyDone),
            s => Err(conflict(format!("branch {branch_tx_id} is {s:?}"))),
        }
    }

    /// Marks the in-progress phase as completed.
    pub fn complete(&self, branch_tx_id: &str, phase: BranchPhase) {
        if let Some(mut record) = self.branches.get_mut(branch_tx_id) {
            if record.state == BranchState::in_progress(phase) {
                record.state = BranchState::done(phase);
                record.touched_at = Instant::now();
            }
        }
    }

    /// Returns a failed phase to `Tried` so the coordinator may retry it.
    pub fn abort(&self, branch_tx_id: &str, phase: BranchPhase) {
        if let Some(mut record) = self.branches.get_mut(branch_tx_id) {
            if record.state == BranchState::in_progress(phase) {
                record.state = BranchState::Tried;
                record.touched_at = Instant::now();
            }
        }
    }

    #[must_use]
    pub fn get(&self, branch_tx_id: &str) -> Option<BranchRecord> {
        self.branches.get(branch_tx_id).map(|r| r.clone())
    }

    /// Stored Try params of a branch.
    #[must_use]
    pub fn params(&self, branch_tx_id: &str) -> Option<(Vec<u8>, Codec)> {
        self.branches
            .get(branch_tx_id)
            .map(|r| (r.params.clone(), r.codec))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}
