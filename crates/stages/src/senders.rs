//! Sender recovery over canonical block bodies.

use crate::{Stage, StageError, StageId, StageOutcome, SyncContext};
use corten_storage::{read_stage_progress, write_stage_progress, ChainProvider, StoreTx};
use tracing::{error, info};

/// Recovers transaction senders from their signatures and persists them
/// per block.
#[derive(Debug, Default)]
pub struct SendersStage;

impl SendersStage {
    fn forward_impl(
        &mut self,
        txn: &mut StoreTx<'_>,
        ctx: &mut SyncContext,
    ) -> Result<StageOutcome, StageError> {
        let tx = txn.tx();
        let progress = read_stage_progress(tx, StageId::SENDERS.0)?;
        let target = ctx.target_height;
        if target <= progress {
            return Ok(StageOutcome::Success);
        }

        let chain = ChainProvider::new(tx);
        for number in progress + 1..=target {
            if ctx.is_stopping() {
                write_stage_progress(tx, StageId::SENDERS.0, number - 1)?;
                return Ok(StageOutcome::StoppedByEnv);
            }
            let hash = chain
                .read_canonical_hash(number)?
                .ok_or(StageError::Inconsistent("canonical hash missing below target"))?;
            let Some(body) = chain.read_body(number, hash)? else {
                return Err(StageError::Inconsistent("canonical body missing below target"));
            };

            let mut senders = Vec::with_capacity(body.transactions.len());
            for transaction in &body.transactions {
                match transaction.recover_sender() {
                    Some(sender) => senders.push(sender),
                    None => {
                        // an unrecoverable signature condemns the block
                        ctx.unwind_point = Some(number - 1);
                        ctx.bad_block_hash = Some(hash);
                        return Ok(StageOutcome::InvalidBlock);
                    }
                }
            }
            chain.write_senders(number, hash, &senders)?;
        }

        write_stage_progress(tx, StageId::SENDERS.0, target)?;
        info!(target: "pipeline", stage = %StageId::SENDERS, progress = target, "senders recovered");
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
        let progress = read_stage_progress(tx, StageId::SENDERS.0)?;
        if to >= progress {
            return Ok(StageOutcome::Success);
        }

        let chain = ChainProvider::new(tx);
        for number in to + 1..=progress {
            if let Some(hash) = chain.read_canonical_hash(number)? {
                chain.delete_senders(number, hash)?;
            }
        }
        write_stage_progress(tx, StageId::SENDERS.0, to)?;
        Ok(StageOutcome::Success)
    }
}

impl Stage for SendersStage {
    fn id(&self) -> StageId {
        StageId::SENDERS
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
