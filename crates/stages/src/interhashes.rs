//! The intermediate-hashes stage: maintains the account and storage tries
//! and produces the state root that must match the header.

use crate::{Stage, StageError, StageId, StageOutcome, SyncContext};
use alloy_primitives::B256;
use corten_storage::{
    read_stage_progress, write_stage_progress, ChainProvider, RawKey, RawValue, StoreTx,
    TrieOfAccounts, TrieOfStorage,
};
use corten_trie::{
    gather_account_changes, gather_storage_changes, Collector, HashedAddresses, PrefixSet,
    StoragePrefixSets, TrieLoader,
};
use reth_db_api::{
    cursor::{DbCursorRO, DbCursorRW},
    transaction::{DbTx, DbTxMut},
};
use tracing::{error, info, warn};

/// Segments wider than this regenerate the tries from scratch instead of
/// updating them incrementally.
const LARGE_SEGMENT_WORTH_REGEN: u64 = 100_000;

/// Computes the state root over the hashed state, regenerating or
/// incrementally updating the trie tables, and reports `WrongStateRoot`
/// with a bisected unwind point on mismatch.
#[derive(Debug, Default)]
pub struct InterHashesStage;

enum RootOutcome {
    Match,
    Mismatch { computed: B256 },
}

impl InterHashesStage {
    /// Runs the loader and, when the root matches, flushes the collected
    /// node records into the trie tables.
    fn compute_and_flush(
        &self,
        txn: &mut StoreTx<'_>,
        changes: Option<(PrefixSet, StoragePrefixSets)>,
        expected_root: B256,
    ) -> Result<RootOutcome, StageError> {
        let tx = txn.tx();
        let (account_changes, storage_changes) = match changes {
            Some((accounts, storage)) => (Some(accounts), storage),
            None => (None, StoragePrefixSets::new()),
        };

        let mut loader = TrieLoader::new(tx, account_changes, storage_changes);
        let computed = loader.calculate_root()?;
        if computed != expected_root {
            // collectors drop here, deleting any spill files
            return Ok(RootOutcome::Mismatch { computed });
        }

        let (account_nodes, storage_nodes) = loader.into_collectors();
        flush_collector::<_, TrieOfAccounts>(tx, account_nodes)?;
        flush_collector::<_, TrieOfStorage>(tx, storage_nodes)?;
        Ok(RootOutcome::Match)
    }

    fn run(
        &mut self,
        txn: &mut StoreTx<'_>,
        ctx: &mut SyncContext,
        previous_progress: u64,
        target: u64,
    ) -> Result<StageOutcome, StageError> {
        let segment_width = previous_progress.abs_diff(target);

        let (expected_root, target_hash) = {
            let chain = ChainProvider::new(txn.tx());
            let hash = chain
                .read_canonical_hash(target)?
                .ok_or(StageError::Inconsistent("canonical hash missing at trie target"))?;
            let header = chain
                .read_header(target, hash)?
                .ok_or(StageError::Inconsistent("canonical header missing at trie target"))?;
            (header.state_root, hash)
        };

        let regenerate = previous_progress == 0 || segment_width > LARGE_SEGMENT_WORTH_REGEN;
        let outcome = if regenerate {
            info!(
                target: "interhashes",
                from = previous_progress,
                to = target,
                "regenerating intermediate hashes"
            );
            txn.tx().clear::<TrieOfAccounts>()?;
            txn.tx().clear::<TrieOfStorage>()?;
            self.compute_and_flush(txn, None, expected_root)?
        } else {
            let tx = txn.tx();
            let mut hashed = HashedAddresses::new();
            let account_changes =
                gather_account_changes(tx, previous_progress, target, &mut hashed)?;
            let storage_changes =
                gather_storage_changes(tx, previous_progress, target, &mut hashed)?;
            drop(hashed);
            self.compute_and_flush(
                txn,
                Some((account_changes, storage_changes)),
                expected_root,
            )?
        };

        match outcome {
            RootOutcome::Match => {
                write_stage_progress(txn.tx(), StageId::INTERMEDIATE_HASHES.0, target)?;
                Ok(StageOutcome::Success)
            }
            RootOutcome::Mismatch { computed } => {
                warn!(
                    target: "interhashes",
                    expected = %expected_root,
                    got = %computed,
                    block = target,
                    "wrong state root"
                );
                if target > previous_progress {
                    // bisect towards the lower half of the segment
                    ctx.unwind_point = Some(previous_progress + segment_width / 2);
                    ctx.bad_block_hash = Some(target_hash);
                }
                Ok(StageOutcome::WrongStateRoot)
            }
        }
    }
}

fn flush_collector<TX, T>(tx: &TX, collector: Collector) -> Result<(), StageError>
where
    TX: DbTx + DbTxMut,
    T: reth_db_api::table::Table<Key = RawKey, Value = RawValue>,
{
    if collector.is_empty() {
        return Ok(());
    }
    // append on an empty table, upsert otherwise
    let empty = tx.cursor_read::<T>()?.first()?.is_none();
    let mut cursor = tx.cursor_write::<T>()?;
    collector.load(|key, value| {
        let key = RawKey(key.to_vec());
        let value = RawValue(value.to_vec());
        if empty {
            cursor.append(key, &value).map_err(corten_storage::StorageError::Database)?;
        } else {
            cursor.upsert(key, &value).map_err(corten_storage::StorageError::Database)?;
        }
        Ok(())
    })?;
    Ok(())
}

impl Stage for InterHashesStage {
    fn id(&self) -> StageId {
        StageId::INTERMEDIATE_HASHES
    }

    fn forward(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome {
        let result = (|| -> Result<StageOutcome, StageError> {
            if ctx.is_stopping() {
                return Ok(StageOutcome::StoppedByEnv);
            }
            let previous_progress =
                read_stage_progress(txn.tx(), StageId::INTERMEDIATE_HASHES.0)?;
            let hashstate_progress = read_stage_progress(txn.tx(), StageId::HASH_STATE.0)?;
            if previous_progress == hashstate_progress {
                return Ok(StageOutcome::Success);
            }
            if previous_progress > hashstate_progress {
                error!(
                    target: "interhashes",
                    trie = previous_progress,
                    hashstate = hashstate_progress,
                    "intermediate hashes ahead of hashed state"
                );
                return Ok(StageOutcome::InvalidProgress);
            }
            self.run(txn, ctx, previous_progress, hashstate_progress)
        })();
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target: "pipeline", stage = %self.id(), %err, "forward failed");
                err.outcome()
            }
        }
    }

    fn unwind(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome {
        let result = (|| -> Result<StageOutcome, StageError> {
            let Some(to) = ctx.unwind_point else {
                return Ok(StageOutcome::Success);
            };
            let previous_progress =
                read_stage_progress(txn.tx(), StageId::INTERMEDIATE_HASHES.0)?;
            if to >= previous_progress {
                return Ok(StageOutcome::Success);
            }
            let outcome = self.run(txn, ctx, previous_progress, to)?;
            Ok(outcome)
        })();
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target: "pipeline", stage = %self.id(), %err, "unwind failed");
                err.outcome()
            }
        }
    }
}
