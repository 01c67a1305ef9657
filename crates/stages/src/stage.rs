//! The stage contract.

use alloy_primitives::B256;
use corten_consensus::ValidationError;
use corten_storage::{StorageError, StoreTx};
use corten_trie::TrieError;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;

/// Identifier of a stage; doubles as the persisted progress key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(pub &'static str);

impl StageId {
    /// Total-difficulty and head bookkeeping over canonical headers.
    pub const HEADERS: Self = Self("Headers");
    /// Sender recovery.
    pub const SENDERS: Self = Self("Senders");
    /// Block execution against the plain state.
    pub const EXECUTION: Self = Self("Execution");
    /// Promotion of the plain state into the hashed state.
    pub const HASH_STATE: Self = Self("HashState");
    /// Merkle-Patricia intermediate hashes and the state root.
    pub const INTERMEDIATE_HASHES: Self = Self("IntermediateHashes");
}

impl core::fmt::Display for StageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.0)
    }
}

/// Outcome of running one stage, and of a whole pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage reached the target.
    Success,
    /// The canonical branch under execution is not the expected fork.
    WrongFork,
    /// A block failed validation.
    InvalidBlock,
    /// The computed state root does not match the header.
    WrongStateRoot,
    /// Stage progress values contradict each other.
    InvalidProgress,
    /// The process-wide stop flag was raised.
    StoppedByEnv,
    /// The chain names an engine this build cannot run.
    UnknownConsensusEngine,
    /// The key/value store failed.
    DbError,
    /// Anything else.
    UnexpectedError,
}

impl StageOutcome {
    /// Whether the stage completed.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Failures that abort a stage body; folded into a [`StageOutcome`] at the
/// stage boundary.
#[derive(Debug, Error)]
pub enum StageError {
    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Validation failure that names no specific block.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Trie machinery failure.
    #[error(transparent)]
    Trie(#[from] TrieError),
    /// A record that must exist was not found.
    #[error("{0}")]
    Inconsistent(&'static str),
}

impl StageError {
    /// The outcome a failure maps to.
    pub fn outcome(&self) -> StageOutcome {
        match self {
            Self::Storage(StorageError::Database(_)) => StageOutcome::DbError,
            Self::Storage(_) => StageOutcome::UnexpectedError,
            Self::Validation(ValidationError::UnknownConsensusEngine) => {
                StageOutcome::UnknownConsensusEngine
            }
            Self::Validation(_) => StageOutcome::InvalidBlock,
            Self::Trie(TrieError::Storage(StorageError::Database(_))) => StageOutcome::DbError,
            Self::Trie(TrieError::Database(_)) => StageOutcome::DbError,
            Self::Trie(_) => StageOutcome::UnexpectedError,
            Self::Inconsistent(_) => StageOutcome::UnexpectedError,
        }
    }
}

/// Shared state of one pipeline pass: the forward target, the unwind
/// request, and what a failing stage reported.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Forward target height.
    pub target_height: u64,
    /// Height to unwind to; also set by a failing forward stage.
    pub unwind_point: Option<u64>,
    /// Hash of the block a failing stage blamed.
    pub bad_block_hash: Option<B256>,
    stop: Arc<AtomicBool>,
}

impl SyncContext {
    /// Creates a context bound to the process-wide stop flag.
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { target_height: 0, unwind_point: None, bad_block_hash: None, stop }
    }

    /// Whether a stop was requested; hot loops poll this between records.
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// A stage of the pipeline.
///
/// A stage is a deterministic function over the write transaction. It is
/// idempotent when invoked with `target <= progress` (returns
/// immediately), never advances past the target, and keeps every
/// store-visible invariant at commit boundaries.
pub trait Stage {
    /// The stage's identifier and progress key.
    fn id(&self) -> StageId;

    /// Advances the stage towards `ctx.target_height`.
    fn forward(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome;

    /// Rolls the stage back to `ctx.unwind_point`.
    fn unwind(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome;

    /// Prunes stage data below the configured horizon.
    fn prune(&mut self, _txn: &mut StoreTx<'_>, _ctx: &mut SyncContext) -> StageOutcome {
        StageOutcome::Success
    }
}
