//! Header bookkeeping over the canonical chain: total difficulty and the
//! head header hash.

use crate::{Stage, StageError, StageId, StageOutcome, SyncContext};
use corten_storage::{
    read_stage_progress, write_stage_progress, ChainProvider, StoreTx,
};
use tracing::{error, info};

/// Walks canonical headers above the stage progress, accumulating total
/// difficulty and recording the head header hash.
#[derive(Debug, Default)]
pub struct HeadersStage;

impl HeadersStage {
    fn forward_impl(
        &mut self,
        txn: &mut StoreTx<'_>,
        ctx: &mut SyncContext,
    ) -> Result<StageOutcome, StageError> {
        let tx = txn.tx();
        let progress = read_stage_progress(tx, StageId::HEADERS.0)?;
        let target = ctx.target_height;
        if target <= progress {
            return Ok(StageOutcome::Success);
        }

        let chain = ChainProvider::new(tx);
        let mut previous_hash = chain
            .read_canonical_hash(progress)?
            .ok_or(StageError::Inconsistent("canonical hash missing at stage progress"))?;
        let mut total_difficulty = chain
            .read_total_difficulty(progress, previous_hash)?
            .ok_or(StageError::Inconsistent("total difficulty missing at stage progress"))?;

        let mut number = progress;
        while number < target {
            if ctx.is_stopping() {
                write_stage_progress(tx, StageId::HEADERS.0, number)?;
                return Ok(StageOutcome::StoppedByEnv);
            }
            number += 1;

            let Some(header) = chain.read_canonical_header(number)? else {
                return Err(StageError::Inconsistent("canonical header table has a hole"));
            };
            if header.parent_hash != previous_hash {
                return Err(StageError::Inconsistent(
                    "canonical headers are not consecutive",
                ));
            }
            let hash = header.hash();
            total_difficulty += header.difficulty;
            chain.write_total_difficulty(number, hash, total_difficulty)?;
            previous_hash = hash;
        }

        chain.write_head_header_hash(previous_hash)?;
        write_stage_progress(tx, StageId::HEADERS.0, target)?;
        info!(target: "pipeline", stage = %StageId::HEADERS, progress = target, "headers updated");
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
        let progress = read_stage_progress(tx, StageId::HEADERS.0)?;
        if to >= progress {
            return Ok(StageOutcome::Success);
        }

        let chain = ChainProvider::new(tx);
        let hash = chain
            .read_canonical_hash(to)?
            .ok_or(StageError::Inconsistent("canonical hash missing at unwind point"))?;
        chain.write_head_header_hash(hash)?;
        write_stage_progress(tx, StageId::HEADERS.0, to)?;
        Ok(StageOutcome::Success)
    }
}

impl Stage for HeadersStage {
    fn id(&self) -> StageId {
        StageId::HEADERS
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
