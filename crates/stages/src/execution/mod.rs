//! The execution stage: applies canonical blocks to the plain state.

mod evm;
mod processor;
mod state;

pub use evm::{Evm, ExecutionOutcome, TransferEvm};
pub use processor::ExecutionProcessor;
pub use state::{DbStateReader, IntraBlockState, StateReader};

use crate::{Stage, StageError, StageId, StageOutcome, SyncContext};
use alloy_primitives::{B256, U256};
use corten_chainspec::{ChainConfig, Revision};
use corten_consensus::{BlockState, ConsensusEngine, ValidationError};
use corten_primitives::{Account, BlockHeader};
use corten_storage::{
    decode_account_changes, decode_storage_changes, read_stage_progress, write_stage_progress,
    ChainProvider, StateWriter, StoreTx,
};
use reth_db_api::transaction::DbTx;
use tracing::{debug, error, info};

/// Adapter presenting the chain tables as the consensus [`BlockState`].
#[derive(Debug)]
pub struct DbBlockState<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> DbBlockState<'tx, TX> {
    /// Creates an adapter over `tx`.
    pub const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX: DbTx> BlockState for DbBlockState<'_, TX> {
    fn header(&self, number: u64, hash: B256) -> Result<Option<BlockHeader>, ValidationError> {
        ChainProvider::new(self.tx)
            .read_header(number, hash)
            .map_err(|_| ValidationError::StateAccess)
    }

    fn total_difficulty(&self, number: u64, hash: B256) -> Result<Option<U256>, ValidationError> {
        ChainProvider::new(self.tx)
            .read_total_difficulty(number, hash)
            .map_err(|_| ValidationError::StateAccess)
    }
}

/// Applies canonical blocks one by one: header/body/ommer validation,
/// per-transaction execution through the EVM seam, receipts verification,
/// finalize, and the buffered write-back into the plain state, change
/// sets and history.
pub struct ExecutionStage<E> {
    config: ChainConfig,
    engine: ConsensusEngine,
    evm: E,
}

impl<E> core::fmt::Debug for ExecutionStage<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionStage").field("chain_id", &self.config.chain_id).finish()
    }
}

impl<E: Evm> ExecutionStage<E> {
    /// Creates the stage.
    pub fn new(config: ChainConfig, engine: ConsensusEngine, evm: E) -> Self {
        Self { config, engine, evm }
    }

    /// The revision a block executes under; a zero-difficulty block is
    /// post-merge regardless of what the pure schedule can see.
    fn block_revision(&self, header: &BlockHeader) -> Revision {
        let revision = self.config.revision(header.number, header.timestamp);
        if header.difficulty.is_zero() && revision < Revision::Paris {
            Revision::Paris
        } else {
            revision
        }
    }

    fn forward_impl(
        &mut self,
        txn: &mut StoreTx<'_>,
        ctx: &mut SyncContext,
    ) -> Result<StageOutcome, StageError> {
        let tx = txn.tx();
        let progress = read_stage_progress(tx, StageId::EXECUTION.0)?;
        let target = ctx.target_height;
        if target <= progress {
            return Ok(StageOutcome::Success);
        }

        let chain = ChainProvider::new(tx);
        for number in progress + 1..=target {
            if ctx.is_stopping() {
                write_stage_progress(tx, StageId::EXECUTION.0, number - 1)?;
                return Ok(StageOutcome::StoppedByEnv);
            }
            let hash = chain
                .read_canonical_hash(number)?
                .ok_or(StageError::Inconsistent("canonical hash missing below target"))?;
            let Some(block) = chain.read_block(number, hash, true)? else {
                return Err(StageError::Inconsistent("canonical block missing below target"));
            };

            let block_state = DbBlockState::new(tx);
            let validation = self
                .engine
                .validate_block_header(&block.header, &block_state, false)
                .and_then(|_| self.engine.validate_seal(&block.header))
                .and_then(|_| self.engine.validate_ommers(&block, &block_state))
                .and_then(|_| self.engine.pre_validate_block_body(&block, &block_state));
            if let Err(objection) = validation {
                if objection == ValidationError::StateAccess {
                    return Err(objection.into());
                }
                debug!(target: "pipeline", number, %hash, %objection, "block rejected");
                ctx.unwind_point = Some(number - 1);
                ctx.bad_block_hash = Some(hash);
                return Ok(StageOutcome::InvalidBlock);
            }

            let revision = self.block_revision(&block.header);
            let reader = DbStateReader::new(tx);
            let mut state = IntraBlockState::new(&reader);
            let mut processor = ExecutionProcessor::new(&self.engine, &mut self.evm);
            match processor.execute_block(&mut state, &block, revision) {
                Ok(_receipts) => {
                    state.write_to_db(tx, number, revision)?;
                    // progress advances block by block so a failure above
                    // leaves nothing applied past the recorded progress
                    write_stage_progress(tx, StageId::EXECUTION.0, number)?;
                }
                Err(StageError::Validation(ValidationError::StateAccess)) => {
                    return Err(ValidationError::StateAccess.into());
                }
                Err(StageError::Validation(objection)) => {
                    debug!(
                        target: "pipeline",
                        number, %hash, %objection, "block failed execution"
                    );
                    ctx.unwind_point = Some(number - 1);
                    ctx.bad_block_hash = Some(hash);
                    return Ok(StageOutcome::InvalidBlock);
                }
                Err(err) => return Err(err),
            }
        }

        info!(target: "pipeline", stage = %StageId::EXECUTION, progress = target, "blocks executed");
        Ok(StageOutcome::Success)
    }

    fn unwind_impl(
        &mut self,
        txn: &mut StoreTx<'_>,
        ctx: &mut SyncContext,
    ) -> Result<StageOutcome, StageError> {
        let Some(to) = ctx.unwind_point else {
            return Ok(StageOutcome::Success);
        };
        let tx = txn.tx();
        let progress = read_stage_progress(tx, StageId::EXECUTION.0)?;
        if to >= progress {
            return Ok(StageOutcome::Success);
        }
        info!(target: "pipeline", stage = %StageId::EXECUTION, from = progress, to, "unwinding");

        let writer = StateWriter::new(tx);
        let mut touched_accounts = std::collections::BTreeSet::new();
        let mut touched_slots = std::collections::BTreeSet::new();

        // walking down restores the oldest prior value last, which is the
        // value as of the unwind point
        for number in (to + 1..=progress).rev() {
            for (address, prior) in decode_account_changes(tx, number)? {
                if prior.is_empty() {
                    writer.upsert_account(address, None)?;
                } else {
                    let account = Account::from_encoded_storage(&prior)?;
                    writer.upsert_account(address, Some(&account))?;
                }
                touched_accounts.insert(address);
            }
            for (address, incarnations) in decode_storage_changes(tx, number)? {
                for (incarnation, slots) in incarnations {
                    for (location, prior) in slots {
                        let mut value = B256::ZERO;
                        value[32 - prior.len()..].copy_from_slice(&prior);
                        writer.upsert_storage(address, incarnation, location, value)?;
                        touched_slots.insert((address, location));
                    }
                }
            }
        }

        for address in touched_accounts {
            writer.unwind_account_history(address, to)?;
        }
        for (address, location) in touched_slots {
            writer.unwind_storage_history(address, location, to)?;
        }
        writer.prune_change_sets_above(to)?;
        write_stage_progress(tx, StageId::EXECUTION.0, to)?;
        Ok(StageOutcome::Success)
    }
}

impl<E: Evm> Stage for ExecutionStage<E> {
    fn id(&self) -> StageId {
        StageId::EXECUTION
    }

    fn forward(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome {
        match self.forward_impl(txn, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target: "pipeline", stage = %self.id(), %err, "forward failed");
                err.outcome()
            }
        }
    }

    fn unwind(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome {
        match self.unwind_impl(txn, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target: "pipeline", stage = %self.id(), %err, "unwind failed");
                err.outcome()
            }
        }
    }
}
