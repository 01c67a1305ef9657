//! Promotion of the plain state into the keccak-keyed hashed state the
//! trie loader streams.

use crate::{Stage, StageError, StageId, StageOutcome, SyncContext};
use alloy_primitives::{keccak256, Address, B256};
use corten_primitives::Account;
use corten_storage::{
    decode_account_changes, decode_storage_changes, read_stage_progress, write_stage_progress,
    HashedAccounts, HashedStorage, HashedStoragePrefix, PlainState, RawKey, RawValue,
    StateProvider, StoreTx, ADDRESS_LENGTH, HASH_LENGTH, INCARNATION_LENGTH,
};
use reth_db_api::{
    cursor::{DbCursorRO, DbCursorRW, DbDupCursorRO, DbDupCursorRW},
    transaction::{DbTx, DbTxMut},
};
use tracing::{error, info};

/// Hashes the plain state into `HashedAccounts`/`HashedStorage`, fully on
/// first run and from change sets afterwards.
#[derive(Debug, Default)]
pub struct HashStateStage;

fn upsert_hashed_account<TX: DbTx + DbTxMut>(
    tx: &TX,
    address: Address,
    encoding: Option<&[u8]>,
) -> Result<(), StageError> {
    let hashed = keccak256(address);
    match encoding {
        Some(encoding) if !encoding.is_empty() => {
            tx.put::<HashedAccounts>(hashed, RawValue(encoding.to_vec()))?;
        }
        _ => {
            tx.delete::<HashedAccounts>(hashed, None)?;
        }
    }
    Ok(())
}

fn upsert_hashed_storage<TX: DbTx + DbTxMut>(
    tx: &TX,
    address: Address,
    incarnation: u64,
    location: B256,
    value: &[u8],
) -> Result<(), StageError> {
    let prefix = HashedStoragePrefix::new(keccak256(address), incarnation);
    let hashed_location = keccak256(location);
    let mut cursor = tx.cursor_dup_write::<HashedStorage>()?;
    if let Some(existing) = cursor.seek_by_key_subkey(prefix, hashed_location)? {
        if existing.0.starts_with(hashed_location.as_slice()) {
            cursor.delete_current()?;
        }
    }
    if !value.is_empty() {
        let mut row = Vec::with_capacity(HASH_LENGTH + value.len());
        row.extend_from_slice(hashed_location.as_slice());
        row.extend_from_slice(value);
        cursor.upsert(prefix, &RawValue(row))?;
    }
    Ok(())
}

fn wipe_hashed_storage<TX: DbTx + DbTxMut>(
    tx: &TX,
    address: Address,
    incarnation: u64,
) -> Result<(), StageError> {
    let prefix = HashedStoragePrefix::new(keccak256(address), incarnation);
    let mut cursor = tx.cursor_dup_write::<HashedStorage>()?;
    if cursor.seek_exact(prefix)?.is_some() {
        cursor.delete_current_duplicates()?;
    }
    Ok(())
}

impl HashStateStage {
    /// Clears and rebuilds the hashed tables from the whole plain state.
    fn promote_clean(&self, txn: &mut StoreTx<'_>) -> Result<(), StageError> {
        let tx = txn.tx();
        tx.clear::<HashedAccounts>()?;
        tx.clear::<HashedStorage>()?;
        info!(target: "pipeline", stage = %StageId::HASH_STATE, "full promotion of the plain state");

        let mut cursor = tx.cursor_read::<PlainState>()?;
        let mut entry = cursor.first()?;
        while let Some((RawKey(key), RawValue(value))) = entry {
            if key.len() == ADDRESS_LENGTH {
                let address = Address::from_slice(&key);
                upsert_hashed_account(tx, address, Some(&value))?;
            } else if key.len() == ADDRESS_LENGTH + INCARNATION_LENGTH
                && value.len() >= HASH_LENGTH
            {
                let address = Address::from_slice(&key[..ADDRESS_LENGTH]);
                let mut incarnation = [0u8; 8];
                incarnation.copy_from_slice(&key[ADDRESS_LENGTH..]);
                let location = B256::from_slice(&value[..HASH_LENGTH]);
                upsert_hashed_storage(
                    tx,
                    address,
                    u64::from_be_bytes(incarnation),
                    location,
                    &value[HASH_LENGTH..],
                )?;
            }
            entry = cursor.next()?;
        }
        Ok(())
    }

    /// Applies the change sets of `(from, to]`, promoting the current
    /// plain-state values of every touched key.
    fn promote_from_change_sets(
        &self,
        txn: &mut StoreTx<'_>,
        from: u64,
        to: u64,
    ) -> Result<(), StageError> {
        let tx = txn.tx();
        let provider = StateProvider::new(tx);

        for block_number in from + 1..=to {
            for (address, prior) in decode_account_changes(tx, block_number)? {
                let current = tx.get::<PlainState>(RawKey::from_address(address))?;
                upsert_hashed_account(tx, address, current.as_ref().map(|raw| raw.0.as_slice()))?;

                // a self-destruct in the segment obsoletes the prior
                // incarnation's hashed storage
                if !prior.is_empty() {
                    let prior_account = Account::from_encoded_storage(&prior)?;
                    if prior_account.incarnation > 0 {
                        let live_incarnation = current
                            .as_deref_account_incarnation()
                            .unwrap_or_default();
                        if live_incarnation != prior_account.incarnation {
                            wipe_hashed_storage(tx, address, prior_account.incarnation)?;
                        }
                    }
                }
            }

            for (address, incarnations) in decode_storage_changes(tx, block_number)? {
                for (incarnation, slots) in incarnations {
                    for (location, _prior) in slots {
                        let value = provider.read_storage(address, incarnation, location)?;
                        let stripped = strip_leading_zeroes(&value);
                        upsert_hashed_storage(tx, address, incarnation, location, stripped)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Restores the prior values of `(to, progress]` into the hashed
    /// tables.
    fn unwind_from_change_sets(
        &self,
        txn: &mut StoreTx<'_>,
        progress: u64,
        to: u64,
    ) -> Result<(), StageError> {
        let tx = txn.tx();
        for block_number in (to + 1..=progress).rev() {
            for (address, prior) in decode_account_changes(tx, block_number)? {
                if prior.is_empty() {
                    upsert_hashed_account(tx, address, None)?;
                } else {
                    upsert_hashed_account(tx, address, Some(&prior))?;
                    // an incarnation bump inside the segment leaves hashed
                    // rows of the newer incarnation behind
                    let prior_account = Account::from_encoded_storage(&prior)?;
                    let live = tx.get::<PlainState>(RawKey::from_address(address))?;
                    if let Some(live_incarnation) = live.as_deref_account_incarnation() {
                        if live_incarnation > prior_account.incarnation {
                            wipe_hashed_storage(tx, address, live_incarnation)?;
                        }
                    }
                }
            }
            for (address, incarnations) in decode_storage_changes(tx, block_number)? {
                for (incarnation, slots) in incarnations {
                    for (location, prior) in slots {
                        upsert_hashed_storage(tx, address, incarnation, location, &prior)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn strip_leading_zeroes(value: &B256) -> &[u8] {
    let first = value.iter().position(|byte| *byte != 0).unwrap_or(HASH_LENGTH);
    &value.as_slice()[first..]
}

/// Incarnation extraction over an optional raw plain-state row.
trait RawAccountExt {
    fn as_deref_account_incarnation(&self) -> Option<u64>;
}

impl RawAccountExt for Option<RawValue> {
    fn as_deref_account_incarnation(&self) -> Option<u64> {
        self.as_ref()
            .filter(|raw| !raw.0.is_empty())
            .and_then(|raw| Account::incarnation_from_encoded_storage(&raw.0).ok())
    }
}

impl Stage for HashStateStage {
    fn id(&self) -> StageId {
        StageId::HASH_STATE
    }

    fn forward(&mut self, txn: &mut StoreTx<'_>, ctx: &mut SyncContext) -> StageOutcome {
        let result = (|| -> Result<StageOutcome, StageError> {
            let progress = read_stage_progress(txn.tx(), StageId::HASH_STATE.0)?;
            let target = ctx.target_height;
            if target <= progress {
                return Ok(StageOutcome::Success);
            }
            if ctx.is_stopping() {
                return Ok(StageOutcome::StoppedByEnv);
            }
            if progress == 0 {
                self.promote_clean(txn)?;
            } else {
                self.promote_from_change_sets(txn, progress, target)?;
            }
            write_stage_progress(txn.tx(), StageId::HASH_STATE.0, target)?;
            Ok(StageOutcome::Success)
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
            let progress = read_stage_progress(txn.tx(), StageId::HASH_STATE.0)?;
            if to >= progress {
                return Ok(StageOutcome::Success);
            }
            self.unwind_from_change_sets(txn, progress, to)?;
            write_stage_progress(txn.tx(), StageId::HASH_STATE.0, to)?;
            Ok(StageOutcome::Success)
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
