//! Plain-state, history and change-set access paths.

use crate::{
    keys::{AccountHistoryKey, RawKey, StorageChangeKey, StorageHistoryKey, StoragePrefix},
    models::{HashValue, RawValue, U64Value},
    tables::{
        AccountChangeSet, AccountHistory, Code, IncarnationMap, PlainCodeHash, PlainState,
        StorageChangeSet, StorageHistory,
    },
    StorageError, ADDRESS_LENGTH, HASH_LENGTH,
};
use alloy_primitives::{Address, B256};
use corten_primitives::{Account, EMPTY_HASH};
use reth_db_api::{
    cursor::{DbCursorRO, DbCursorRW, DbDupCursorRO, DbDupCursorRW},
    transaction::{DbTx, DbTxMut},
};
use roaring::RoaringTreemap;
use std::collections::BTreeMap;

/// Upper bound of the single open history shard per key.
const HISTORY_SHARD_SENTINEL: u64 = u64::MAX;

/// `address → incarnation → location → prior value` of one block.
pub type StorageChanges = BTreeMap<Address, BTreeMap<u64, BTreeMap<B256, Vec<u8>>>>;

/// The least element of `bitmap` that is `>= min`.
pub fn bitmap_seek(bitmap: &RoaringTreemap, min: u64) -> Option<u64> {
    bitmap.iter().find(|block| *block >= min)
}

/// State access over one transaction.
#[derive(Debug)]
pub struct StateProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> StateProvider<'tx, TX> {
    /// Creates a provider over `tx`.
    pub const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX: DbTx> StateProvider<'_, TX> {
    /// Reads the current account record, restoring the code hash from
    /// `PlainCodeHash` when the compact encoding omitted it.
    pub fn read_account(&self, address: Address) -> Result<Option<Account>, StorageError> {
        let Some(raw) = self.tx.get::<PlainState>(RawKey::from_address(address))? else {
            return Ok(None);
        };
        if raw.0.is_empty() {
            return Ok(None);
        }
        let mut account = Account::from_encoded_storage(&raw.0)?;
        if account.incarnation > 0 && account.code_hash == EMPTY_HASH {
            let prefix = StoragePrefix::new(address, account.incarnation);
            if let Some(HashValue(code_hash)) = self.tx.get::<PlainCodeHash>(prefix)? {
                account.code_hash = code_hash;
            }
        }
        Ok(Some(account))
    }

    /// Reads the account as of `block_number` from the history index,
    /// falling back to the current record when no history covers it.
    pub fn read_account_at(
        &self,
        address: Address,
        block_number: u64,
    ) -> Result<Option<Account>, StorageError> {
        let mut cursor = self.tx.cursor_read::<AccountHistory>()?;
        let entry = cursor.seek(AccountHistoryKey { address, block_number })?;
        if let Some((key, raw)) = entry {
            if key.address == address {
                let bitmap = RoaringTreemap::deserialize_from(&raw.0[..])
                    .map_err(|_| StorageError::EntryNotFound("malformed history bitmap"))?;
                if let Some(change_block) = bitmap_seek(&bitmap, block_number) {
                    match self.find_account_change(change_block, address)? {
                        Some(prior) if prior.is_empty() => return Ok(None),
                        Some(prior) => {
                            return Ok(Some(Account::from_encoded_storage(&prior)?));
                        }
                        None => {}
                    }
                }
            }
        }
        self.read_account(address)
    }

    /// The prior encoding of `address` recorded in the change set of
    /// `block_number`, if present.
    pub fn find_account_change(
        &self,
        block_number: u64,
        address: Address,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let mut cursor = self.tx.cursor_dup_read::<AccountChangeSet>()?;
        let Some(raw) = cursor.seek_by_key_subkey(block_number, address)? else {
            return Ok(None);
        };
        if !raw.0.starts_with(address.as_slice()) {
            return Ok(None);
        }
        Ok(Some(raw.0[ADDRESS_LENGTH..].to_vec()))
    }

    /// Reads a current storage value; zero when absent.
    pub fn read_storage(
        &self,
        address: Address,
        incarnation: u64,
        location: B256,
    ) -> Result<B256, StorageError> {
        let key = RawKey::from_storage_prefix(StoragePrefix::new(address, incarnation));
        let mut cursor = self.tx.cursor_dup_read::<PlainState>()?;
        let Some(raw) = cursor.seek_by_key_subkey(key, location)? else {
            return Ok(B256::ZERO);
        };
        if !raw.0.starts_with(location.as_slice()) {
            return Ok(B256::ZERO);
        }
        Ok(widen_storage_value(&raw.0[HASH_LENGTH..]))
    }

    /// Reads a storage value as of `block_number` from the history index.
    pub fn read_storage_at(
        &self,
        address: Address,
        incarnation: u64,
        location: B256,
        block_number: u64,
    ) -> Result<B256, StorageError> {
        let mut cursor = self.tx.cursor_read::<StorageHistory>()?;
        let entry = cursor.seek(StorageHistoryKey { address, location, block_number })?;
        if let Some((key, raw)) = entry {
            if key.address == address && key.location == location {
                let bitmap = RoaringTreemap::deserialize_from(&raw.0[..])
                    .map_err(|_| StorageError::EntryNotFound("malformed history bitmap"))?;
                if let Some(change_block) = bitmap_seek(&bitmap, block_number) {
                    let mut change_cursor = self.tx.cursor_dup_read::<StorageChangeSet>()?;
                    let change_key =
                        StorageChangeKey { block_number: change_block, address, incarnation };
                    if let Some(raw) = change_cursor.seek_by_key_subkey(change_key, location)? {
                        if raw.0.starts_with(location.as_slice()) {
                            return Ok(widen_storage_value(&raw.0[HASH_LENGTH..]));
                        }
                    }
                    return Ok(B256::ZERO);
                }
            }
        }
        self.read_storage(address, incarnation, location)
    }

    /// Reads contract code by its hash.
    pub fn read_code(&self, code_hash: B256) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.tx.get::<Code>(code_hash)?.map(|raw| raw.0))
    }

    /// Reads the previous incarnation of an address.
    ///
    /// The historical variant (`block_number` set) is intentionally
    /// unresolved and answers `None`; only the incarnation map is
    /// consulted for the present.
    pub fn read_previous_incarnation(
        &self,
        address: Address,
        block_number: Option<u64>,
    ) -> Result<Option<u64>, StorageError> {
        if block_number.is_some() {
            return Ok(None);
        }
        Ok(self.tx.get::<IncarnationMap>(address)?.map(|value| value.0))
    }
}

/// Widens a zeroless storage value back to 32 bytes.
fn widen_storage_value(value: &[u8]) -> B256 {
    let mut out = B256::ZERO;
    out[HASH_LENGTH - value.len()..].copy_from_slice(value);
    out
}

/// The non-zero suffix of a 32-byte value.
pub(crate) fn zeroless_view(value: &B256) -> &[u8] {
    let first = value.iter().position(|byte| *byte != 0).unwrap_or(HASH_LENGTH);
    &value.as_slice()[first..]
}

/// Reads the account change set of one block:
/// `address → prior storage encoding` (empty = created).
pub fn decode_account_changes<TX: DbTx>(
    tx: &TX,
    block_number: u64,
) -> Result<BTreeMap<Address, Vec<u8>>, StorageError> {
    let mut changes = BTreeMap::new();
    let mut cursor = tx.cursor_dup_read::<AccountChangeSet>()?;
    let mut entry = cursor.seek_exact(block_number)?;
    while let Some((key, raw)) = entry {
        if key != block_number {
            break;
        }
        if raw.0.len() < ADDRESS_LENGTH {
            return Err(StorageError::EntryNotFound("malformed account change record"));
        }
        let address = Address::from_slice(&raw.0[..ADDRESS_LENGTH]);
        changes.insert(address, raw.0[ADDRESS_LENGTH..].to_vec());
        entry = cursor.next()?;
    }
    Ok(changes)
}

/// Reads the storage change set of one block.
pub fn decode_storage_changes<TX: DbTx>(
    tx: &TX,
    block_number: u64,
) -> Result<StorageChanges, StorageError> {
    let mut changes: StorageChanges = BTreeMap::new();
    let mut cursor = tx.cursor_dup_read::<StorageChangeSet>()?;
    let start = StorageChangeKey { block_number, address: Address::ZERO, incarnation: 0 };
    let mut entry = cursor.seek(start)?;
    while let Some((key, raw)) = entry {
        if key.block_number != block_number {
            break;
        }
        if raw.0.len() < HASH_LENGTH {
            return Err(StorageError::EntryNotFound("malformed storage change record"));
        }
        let location = B256::from_slice(&raw.0[..HASH_LENGTH]);
        changes
            .entry(key.address)
            .or_default()
            .entry(key.incarnation)
            .or_default()
            .insert(location, raw.0[HASH_LENGTH..].to_vec());
        entry = cursor.next()?;
    }
    Ok(changes)
}

/// State mutation paths over one write transaction.
#[derive(Debug)]
pub struct StateWriter<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> StateWriter<'tx, TX> {
    /// Creates a writer over `tx`.
    pub const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX: DbTx + DbTxMut> StateWriter<'_, TX> {
    /// Upserts or deletes the account row of `address`.
    pub fn upsert_account(
        &self,
        address: Address,
        account: Option<&Account>,
    ) -> Result<(), StorageError> {
        match account {
            Some(account) => {
                let encoded = account.encode_for_storage(false);
                self.tx.put::<PlainState>(RawKey::from_address(address), RawValue(encoded))?;
            }
            None => {
                self.tx.delete::<PlainState>(RawKey::from_address(address), None)?;
            }
        }
        Ok(())
    }

    /// Upserts a storage slot inside the multi-value plain-state table;
    /// zero values erase the slot.
    pub fn upsert_storage(
        &self,
        address: Address,
        incarnation: u64,
        location: B256,
        value: B256,
    ) -> Result<(), StorageError> {
        let key = RawKey::from_storage_prefix(StoragePrefix::new(address, incarnation));
        let mut cursor = self.tx.cursor_dup_write::<PlainState>()?;
        if let Some(existing) = cursor.seek_by_key_subkey(key.clone(), location)? {
            if existing.0.starts_with(location.as_slice()) {
                cursor.delete_current()?;
            }
        }
        if !value.is_zero() {
            let mut row = Vec::with_capacity(HASH_LENGTH + 32);
            row.extend_from_slice(location.as_slice());
            row.extend_from_slice(zeroless_view(&value));
            cursor.upsert(key, &RawValue(row))?;
        }
        Ok(())
    }

    /// Deletes every storage row under `address ‖ incarnation`.
    pub fn wipe_storage(&self, address: Address, incarnation: u64) -> Result<(), StorageError> {
        let key = RawKey::from_storage_prefix(StoragePrefix::new(address, incarnation));
        let mut cursor = self.tx.cursor_dup_write::<PlainState>()?;
        if cursor.seek_exact(key)?.is_some() {
            cursor.delete_current_duplicates()?;
        }
        Ok(())
    }

    /// Stores contract code under its hash.
    pub fn write_code(&self, code_hash: B256, code: &[u8]) -> Result<(), StorageError> {
        self.tx.put::<Code>(code_hash, RawValue(code.to_vec()))?;
        Ok(())
    }

    /// Records the code hash of `address ‖ incarnation`.
    pub fn write_code_hash(
        &self,
        address: Address,
        incarnation: u64,
        code_hash: B256,
    ) -> Result<(), StorageError> {
        self.tx
            .put::<PlainCodeHash>(StoragePrefix::new(address, incarnation), HashValue(code_hash))?;
        Ok(())
    }

    /// Records the incarnation a self-destructed contract reached.
    pub fn write_incarnation(&self, address: Address, incarnation: u64) -> Result<(), StorageError> {
        self.tx.put::<IncarnationMap>(address, U64Value(incarnation))?;
        Ok(())
    }

    /// Appends one account change-set entry: the prior encoding of the
    /// account (empty = the account did not exist).
    pub fn write_account_change(
        &self,
        block_number: u64,
        address: Address,
        prior: &[u8],
    ) -> Result<(), StorageError> {
        let mut row = Vec::with_capacity(ADDRESS_LENGTH + prior.len());
        row.extend_from_slice(address.as_slice());
        row.extend_from_slice(prior);
        self.tx.put::<AccountChangeSet>(block_number, RawValue(row))?;
        Ok(())
    }

    /// Appends one storage change-set entry: the prior value of the slot.
    pub fn write_storage_change(
        &self,
        block_number: u64,
        address: Address,
        incarnation: u64,
        location: B256,
        prior: B256,
    ) -> Result<(), StorageError> {
        let mut row = Vec::with_capacity(HASH_LENGTH + 32);
        row.extend_from_slice(location.as_slice());
        row.extend_from_slice(zeroless_view(&prior));
        self.tx.put::<StorageChangeSet>(
            StorageChangeKey { block_number, address, incarnation },
            RawValue(row),
        )?;
        Ok(())
    }

    /// Deletes every change-set entry of blocks strictly above `keep`.
    pub fn prune_change_sets_above(&self, keep: u64) -> Result<(), StorageError> {
        let mut cursor = self.tx.cursor_write::<AccountChangeSet>()?;
        let mut entry = cursor.seek(keep + 1)?;
        while entry.is_some() {
            cursor.delete_current()?;
            entry = cursor.next()?;
        }

        let mut cursor = self.tx.cursor_write::<StorageChangeSet>()?;
        let start =
            StorageChangeKey { block_number: keep + 1, address: Address::ZERO, incarnation: 0 };
        let mut entry = cursor.seek(start)?;
        while entry.is_some() {
            cursor.delete_current()?;
            entry = cursor.next()?;
        }
        Ok(())
    }

    /// Adds `block_number` to the account-history bitmap of `address`.
    pub fn index_account_change(
        &self,
        address: Address,
        block_number: u64,
    ) -> Result<(), StorageError> {
        let key = AccountHistoryKey { address, block_number: HISTORY_SHARD_SENTINEL };
        let mut bitmap = match self.tx.get::<AccountHistory>(key)? {
            Some(raw) => RoaringTreemap::deserialize_from(&raw.0[..])
                .map_err(|_| StorageError::EntryNotFound("malformed history bitmap"))?,
            None => RoaringTreemap::new(),
        };
        bitmap.insert(block_number);
        let mut value = Vec::with_capacity(bitmap.serialized_size());
        bitmap
            .serialize_into(&mut value)
            .map_err(|_| StorageError::EntryNotFound("unserializable history bitmap"))?;
        self.tx.put::<AccountHistory>(key, RawValue(value))?;
        Ok(())
    }

    /// Adds `block_number` to the storage-history bitmap of a slot.
    pub fn index_storage_change(
        &self,
        address: Address,
        location: B256,
        block_number: u64,
    ) -> Result<(), StorageError> {
        let key = StorageHistoryKey { address, location, block_number: HISTORY_SHARD_SENTINEL };
        let mut bitmap = match self.tx.get::<StorageHistory>(key)? {
            Some(raw) => RoaringTreemap::deserialize_from(&raw.0[..])
                .map_err(|_| StorageError::EntryNotFound("malformed history bitmap"))?,
            None => RoaringTreemap::new(),
        };
        bitmap.insert(block_number);
        let mut value = Vec::with_capacity(bitmap.serialized_size());
        bitmap
            .serialize_into(&mut value)
            .map_err(|_| StorageError::EntryNotFound("unserializable history bitmap"))?;
        self.tx.put::<StorageHistory>(key, RawValue(value))?;
        Ok(())
    }

    /// Removes every block strictly above `keep` from the history bitmap
    /// of `address`; empty bitmaps erase the record.
    pub fn unwind_account_history(&self, address: Address, keep: u64) -> Result<(), StorageError> {
        let key = AccountHistoryKey { address, block_number: HISTORY_SHARD_SENTINEL };
        let Some(raw) = self.tx.get::<AccountHistory>(key)? else {
            return Ok(());
        };
        let mut bitmap = RoaringTreemap::deserialize_from(&raw.0[..])
            .map_err(|_| StorageError::EntryNotFound("malformed history bitmap"))?;
        bitmap.remove_range(keep + 1..);
        if bitmap.is_empty() {
            self.tx.delete::<AccountHistory>(key, None)?;
        } else {
            let mut value = Vec::with_capacity(bitmap.serialized_size());
            bitmap
                .serialize_into(&mut value)
                .map_err(|_| StorageError::EntryNotFound("unserializable history bitmap"))?;
            self.tx.put::<AccountHistory>(key, RawValue(value))?;
        }
        Ok(())
    }

    /// Removes every block strictly above `keep` from the history bitmap
    /// of a storage slot.
    pub fn unwind_storage_history(
        &self,
        address: Address,
        location: B256,
        keep: u64,
    ) -> Result<(), StorageError> {
        let key = StorageHistoryKey { address, location, block_number: HISTORY_SHARD_SENTINEL };
        let Some(raw) = self.tx.get::<StorageHistory>(key)? else {
            return Ok(());
        };
        let mut bitmap = RoaringTreemap::deserialize_from(&raw.0[..])
            .map_err(|_| StorageError::EntryNotFound("malformed history bitmap"))?;
        bitmap.remove_range(keep + 1..);
        if bitmap.is_empty() {
            self.tx.delete::<StorageHistory>(key, None)?;
        } else {
            let mut value = Vec::with_capacity(bitmap.serialized_size());
            bitmap
                .serialize_into(&mut value)
                .map_err(|_| StorageError::EntryNotFound("unserializable history bitmap"))?;
            self.tx.put::<StorageHistory>(key, RawValue(value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use alloy_primitives::U256;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn account_roundtrip_and_delete() {
        let (_dir, store) = test_store();
        let batch = store.begin_rw().unwrap();
        let writer = StateWriter::new(batch.tx());
        let provider = StateProvider::new(batch.tx());

        let address = Address::repeat_byte(0x11);
        let account = Account { nonce: 3, balance: U256::from(1000u64), ..Default::default() };
        writer.upsert_account(address, Some(&account)).unwrap();
        assert_eq!(provider.read_account(address).unwrap(), Some(account));

        writer.upsert_account(address, None).unwrap();
        assert_eq!(provider.read_account(address).unwrap(), None);
    }

    #[test]
    fn storage_upsert_read_wipe() {
        let (_dir, store) = test_store();
        let batch = store.begin_rw().unwrap();
        let writer = StateWriter::new(batch.tx());
        let provider = StateProvider::new(batch.tx());

        let address = Address::repeat_byte(0x22);
        let loc_a = B256::with_last_byte(1);
        let loc_b = B256::with_last_byte(2);

        writer.upsert_storage(address, 1, loc_a, B256::with_last_byte(0xaa)).unwrap();
        writer.upsert_storage(address, 1, loc_b, B256::with_last_byte(0xbb)).unwrap();
        assert_eq!(provider.read_storage(address, 1, loc_a).unwrap(), B256::with_last_byte(0xaa));
        assert_eq!(provider.read_storage(address, 1, loc_b).unwrap(), B256::with_last_byte(0xbb));
        // other incarnations see nothing
        assert_eq!(provider.read_storage(address, 2, loc_a).unwrap(), B256::ZERO);

        // overwrite and erase
        writer.upsert_storage(address, 1, loc_a, B256::with_last_byte(0xcc)).unwrap();
        assert_eq!(provider.read_storage(address, 1, loc_a).unwrap(), B256::with_last_byte(0xcc));
        writer.upsert_storage(address, 1, loc_a, B256::ZERO).unwrap();
        assert_eq!(provider.read_storage(address, 1, loc_a).unwrap(), B256::ZERO);

        writer.wipe_storage(address, 1).unwrap();
        assert_eq!(provider.read_storage(address, 1, loc_b).unwrap(), B256::ZERO);
    }

    #[test]
    fn change_sets_decode_per_block() {
        let (_dir, store) = test_store();
        let batch = store.begin_rw().unwrap();
        let writer = StateWriter::new(batch.tx());

        let alice = Address::repeat_byte(0xaa);
        let bob = Address::repeat_byte(0xbb);
        let prior = Account { nonce: 1, ..Default::default() }.encode_for_storage(false);

        writer.write_account_change(5, alice, &prior).unwrap();
        writer.write_account_change(5, bob, &[]).unwrap();
        writer.write_account_change(6, alice, &[]).unwrap();
        writer
            .write_storage_change(5, alice, 1, B256::with_last_byte(9), B256::with_last_byte(7))
            .unwrap();

        let changes = decode_account_changes(batch.tx(), 5).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[&alice], prior);
        assert!(changes[&bob].is_empty());

        let storage = decode_storage_changes(batch.tx(), 5).unwrap();
        assert_eq!(
            storage[&alice][&1][&B256::with_last_byte(9)],
            zeroless_view(&B256::with_last_byte(7)).to_vec()
        );
        assert!(decode_storage_changes(batch.tx(), 6).unwrap().is_empty());

        writer.prune_change_sets_above(5).unwrap();
        assert!(decode_account_changes(batch.tx(), 6).unwrap().is_empty());
        assert!(!decode_account_changes(batch.tx(), 5).unwrap().is_empty());
    }

    #[test]
    fn history_answers_point_in_time_reads() {
        let (_dir, store) = test_store();
        let batch = store.begin_rw().unwrap();
        let writer = StateWriter::new(batch.tx());
        let provider = StateProvider::new(batch.tx());

        let address = Address::repeat_byte(0x33);
        let old = Account { nonce: 1, balance: U256::from(7u64), ..Default::default() };

        // block 10 changed the account from `old` to the current record
        writer.write_account_change(10, address, &old.encode_for_storage(false)).unwrap();
        writer.index_account_change(address, 10).unwrap();
        let current = Account { nonce: 2, balance: U256::from(9u64), ..Default::default() };
        writer.upsert_account(address, Some(&current)).unwrap();

        // a read at block <= 10 sees the prior value
        assert_eq!(provider.read_account_at(address, 9).unwrap(), Some(old));
        // a read past the last change falls through to the plain state
        assert_eq!(provider.read_account_at(address, 11).unwrap(), Some(current));
    }

    #[test]
    fn history_unwind_trims_bitmaps() {
        let (_dir, store) = test_store();
        let batch = store.begin_rw().unwrap();
        let writer = StateWriter::new(batch.tx());

        let address = Address::repeat_byte(0x44);
        writer.index_account_change(address, 5).unwrap();
        writer.index_account_change(address, 8).unwrap();
        writer.unwind_account_history(address, 6).unwrap();

        let key = AccountHistoryKey { address, block_number: HISTORY_SHARD_SENTINEL };
        let raw = batch.tx().get::<AccountHistory>(key).unwrap().unwrap();
        let bitmap = RoaringTreemap::deserialize_from(&raw.0[..]).unwrap();
        assert!(bitmap.contains(5));
        assert!(!bitmap.contains(8));

        writer.unwind_account_history(address, 0).unwrap();
        assert!(batch.tx().get::<AccountHistory>(key).unwrap().is_none());
    }

    #[test]
    fn previous_incarnation_current_only() {
        let (_dir, store) = test_store();
        let batch = store.begin_rw().unwrap();
        let writer = StateWriter::new(batch.tx());
        let provider = StateProvider::new(batch.tx());

        let address = Address::repeat_byte(0x55);
        writer.write_incarnation(address, 2).unwrap();
        assert_eq!(provider.read_previous_incarnation(address, None).unwrap(), Some(2));
        // the historical variant stays unresolved
        assert_eq!(provider.read_previous_incarnation(address, Some(10)).unwrap(), None);
    }
}
