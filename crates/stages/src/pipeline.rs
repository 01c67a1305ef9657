//! The staged pipeline: an ordered stage list with forward, unwind and
//! prune passes.

use crate::{
    execution::{Evm, ExecutionStage},
    HashStateStage, HeadersStage, InterHashesStage, SendersStage, Stage, StageId, StageOutcome,
    SyncContext,
};
use alloy_primitives::B256;
use corten_chainspec::ChainConfig;
use corten_consensus::ConsensusEngine;
use corten_storage::{read_stage_progress, ChainProvider, StoreTx};
use std::sync::{atomic::AtomicBool, Arc};
use tracing::{error, info};

/// The ordered stage list.
///
/// Forward runs every stage up to the target and stops at the first
/// non-success, leaving the failing stage's unwind point and bad-block
/// hash in the context. Unwind runs the stages in reverse order, except
/// that the hashed state must be rolled back before the trie over it, so
/// those two swap.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    unwind_order: Vec<usize>,
    ctx: SyncContext,
    head_number: u64,
    head_hash: B256,
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("head_number", &self.head_number)
            .finish()
    }
}

impl Pipeline {
    /// Builds the standard pipeline for `config`.
    pub fn new<E: Evm + 'static>(
        config: ChainConfig,
        engine: ConsensusEngine,
        evm: E,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(HeadersStage),
            Box::new(SendersStage),
            Box::new(ExecutionStage::new(config, engine, evm)),
            Box::new(HashStateStage),
            Box::new(InterHashesStage),
        ];
        // reverse order, with HashState rolled back before InterHashes
        let unwind_order = vec![3, 4, 2, 1, 0];
        Self {
            stages,
            unwind_order,
            ctx: SyncContext::new(stop),
            head_number: 0,
            head_hash: B256::ZERO,
        }
    }

    /// The unwind point the last failing stage requested.
    pub fn unwind_point(&self) -> Option<u64> {
        self.ctx.unwind_point
    }

    /// The block the last failing stage blamed.
    pub fn bad_block(&self) -> Option<B256> {
        self.ctx.bad_block_hash
    }

    /// Head block number after the last pass.
    pub fn head_header_number(&self) -> u64 {
        self.head_number
    }

    /// Head block hash after the last pass.
    pub fn head_header_hash(&self) -> B256 {
        self.head_hash
    }

    fn refresh_head(&mut self, txn: &StoreTx<'_>) {
        let tx = txn.tx();
        if let Ok(number) = read_stage_progress(tx, StageId::HEADERS.0) {
            self.head_number = number;
            if let Ok(Some(hash)) = ChainProvider::new(tx).read_canonical_hash(number) {
                self.head_hash = hash;
            }
        }
    }

    /// Runs every stage forward up to `target`.
    pub fn forward(&mut self, txn: &mut StoreTx<'_>, target: u64) -> StageOutcome {
        self.ctx.target_height = target;
        self.ctx.unwind_point = None;
        self.ctx.bad_block_hash = None;

        let mut outcome = StageOutcome::Success;
        for index in 0..self.stages.len() {
            let id = self.stages[index].id();
            outcome = self.stages[index].forward(txn, &mut self.ctx);
            if !outcome.is_success() {
                error!(target: "pipeline", stage = %id, ?outcome, "forward stopped");
                break;
            }
            // commit between stages; a no-op while commit is disabled
            if let Err(err) = txn.commit_and_renew() {
                error!(target: "pipeline", stage = %id, %err, "commit failed");
                outcome = StageOutcome::DbError;
                break;
            }
        }
        self.refresh_head(txn);
        info!(
            target: "pipeline",
            ?outcome,
            head = self.head_number,
            "forward pass finished"
        );
        outcome
    }

    /// Rolls every stage back to `to`.
    pub fn unwind(&mut self, txn: &mut StoreTx<'_>, to: u64) -> StageOutcome {
        self.ctx.unwind_point = Some(to);
        info!(target: "pipeline", to, "unwinding");

        for index in self.unwind_order.clone() {
            let id = self.stages[index].id();
            let outcome = self.stages[index].unwind(txn, &mut self.ctx);
            if !outcome.is_success() {
                error!(target: "pipeline", stage = %id, ?outcome, "unwind stopped");
                self.refresh_head(txn);
                return outcome;
            }
            if let Err(err) = txn.commit_and_renew() {
                error!(target: "pipeline", stage = %id, %err, "commit failed");
                return StageOutcome::DbError;
            }
        }
        self.refresh_head(txn);
        StageOutcome::Success
    }

    /// Runs each stage's prune pass.
    pub fn prune(&mut self, txn: &mut StoreTx<'_>) -> StageOutcome {
        for index in 0..self.stages.len() {
            let outcome = self.stages[index].prune(txn, &mut self.ctx);
            if !outcome.is_success() {
                return outcome;
            }
        }
        StageOutcome::Success
    }
}
