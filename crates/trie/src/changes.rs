//! Derives the changed-prefix sets that drive incremental trie updates
//! from the change sets accumulated during execution.

use crate::{unpack_nibbles, PrefixSet, TrieError};
use alloy_primitives::{keccak256, Address, B256};
use corten_primitives::Account;
use corten_storage::{
    AccountChangeSet, HashedStoragePrefix, RawKey, RawValue, StateProvider, StorageChangeKey,
    StorageChangeSet, TrieOfStorage, ADDRESS_LENGTH, HASH_LENGTH,
};
use lru::LruCache;
use reth_db_api::{
    cursor::{DbCursorRO, DbCursorRW},
    table::Encode,
    transaction::{DbTx, DbTxMut},
};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use tracing::trace;

/// Per-`(hashed address ‖ incarnation)` sets of changed storage-location
/// nibble paths.
pub type StoragePrefixSets = BTreeMap<Vec<u8>, PrefixSet>;

const PLAIN_ACCOUNT_CACHE: usize = 100_000;

/// Hashed-address cache shared between the account and storage gathering
/// passes, so addresses touched by both are hashed once.
pub type HashedAddresses = BTreeMap<Address, B256>;

fn hashed_address(cache: &mut HashedAddresses, address: Address) -> B256 {
    *cache.entry(address).or_insert_with(|| keccak256(address))
}

/// Walks `AccountChangeSet` over `(min(from, to), max(from, to)]` and
/// returns the prefix set of changed hashed accounts.
///
/// Self-destructs and incarnation bumps are detected by comparing each
/// entry's prior account against the current `PlainState` record (which,
/// on unwind, has not itself been unwound yet); the storage-trie subtrees
/// of destroyed incarnations are deleted here, before the loader runs.
pub fn gather_account_changes<TX: DbTx + DbTxMut>(
    tx: &TX,
    from: u64,
    to: u64,
    hashed: &mut HashedAddresses,
) -> Result<PrefixSet, TrieError> {
    let forward = to > from;
    let first_block = from.min(to) + 1;
    let last_block = from.max(to);

    let state = StateProvider::new(tx);
    let mut plain_cache: LruCache<Address, Option<Account>> =
        LruCache::new(NonZeroUsize::new(PLAIN_ACCOUNT_CACHE).expect("nonzero cache size"));
    let mut deleted_prefixes: BTreeSet<Vec<u8>> = BTreeSet::new();
    let mut changed = PrefixSet::new();

    let mut cursor = tx.cursor_read::<AccountChangeSet>()?;
    let mut entry = cursor.seek(first_block)?;
    while let Some((block_number, RawValue(row))) = entry {
        if block_number > last_block {
            break;
        }
        if row.len() < ADDRESS_LENGTH {
            return Err(TrieError::Storage(corten_storage::StorageError::EntryNotFound(
                "malformed account change record",
            )));
        }
        let address = Address::from_slice(&row[..ADDRESS_LENGTH]);
        let prior = &row[ADDRESS_LENGTH..];

        let plain_account = match plain_cache.get(&address).copied() {
            Some(cached) => cached,
            None => {
                let loaded = state.read_account(address)?;
                plain_cache.put(address, loaded);
                loaded
            }
        };

        let mut account_created = false;
        if forward {
            // no prior value means the block created the account; a prior
            // incarnation that differs from the live record means the
            // contract self-destructed (and possibly re-created) in the
            // segment, so its old storage subtree must go
            if prior.is_empty() {
                account_created = true;
            } else {
                let prior_account = Account::from_encoded_storage(prior)?;
                if prior_account.incarnation > 0
                    && plain_account.is_none_or(|a| a.incarnation != prior_account.incarnation)
                {
                    deleted_prefixes.insert(
                        storage_trie_prefix(
                            hashed_address(hashed, address),
                            prior_account.incarnation,
                        ),
                    );
                }
            }
        } else {
            // unwinding: the plain state still reflects the higher block,
            // so absence there means the segment created the account
            match plain_account {
                None => account_created = true,
                Some(live) if live.incarnation > 0 => {
                    if prior.is_empty() {
                        deleted_prefixes.insert(storage_trie_prefix(
                            hashed_address(hashed, address),
                            live.incarnation,
                        ));
                    } else {
                        let prior_account = Account::from_encoded_storage(prior)?;
                        if prior_account.incarnation > live.incarnation {
                            deleted_prefixes.insert(storage_trie_prefix(
                                hashed_address(hashed, address),
                                live.incarnation,
                            ));
                        }
                    }
                }
                Some(_) => {}
            }
        }

        changed.insert(
            unpack_nibbles(hashed_address(hashed, address).as_slice()),
            account_created,
        );
        entry = cursor.next()?;
    }

    if !deleted_prefixes.is_empty() {
        trace!(
            target: "interhashes",
            prefixes = deleted_prefixes.len(),
            "purging storage-trie subtrees of destroyed incarnations"
        );
        let mut trie_cursor = tx.cursor_write::<TrieOfStorage>()?;
        for prefix in &deleted_prefixes {
            let mut node = trie_cursor.seek(RawKey(prefix.clone()))?;
            while let Some((key, _)) = node {
                if !key.0.starts_with(prefix) {
                    break;
                }
                trie_cursor.delete_current()?;
                node = trie_cursor.next()?;
            }
        }
    }

    Ok(changed)
}

/// Walks `StorageChangeSet` over `(min(from, to), max(from, to)]` and
/// returns, per `(hashed address ‖ incarnation)` prefix, the set of
/// changed hashed-location nibble paths.
pub fn gather_storage_changes<TX: DbTx>(
    tx: &TX,
    from: u64,
    to: u64,
    hashed: &mut HashedAddresses,
) -> Result<StoragePrefixSets, TrieError> {
    let first_block = from.min(to) + 1;
    let last_block = from.max(to);

    let mut sets = StoragePrefixSets::new();
    let mut cursor = tx.cursor_read::<StorageChangeSet>()?;
    let start = StorageChangeKey {
        block_number: first_block,
        address: Address::ZERO,
        incarnation: 0,
    };
    let mut entry = cursor.seek(start)?;
    while let Some((key, RawValue(row))) = entry {
        if key.block_number > last_block {
            break;
        }
        if row.len() < HASH_LENGTH {
            return Err(TrieError::Storage(corten_storage::StorageError::EntryNotFound(
                "malformed storage change record",
            )));
        }
        let location = B256::from_slice(&row[..HASH_LENGTH]);
        let created = row.len() == HASH_LENGTH;

        let prefix =
            storage_trie_prefix(hashed_address(hashed, key.address), key.incarnation);
        sets.entry(prefix)
            .or_default()
            .insert(unpack_nibbles(keccak256(location).as_slice()), created);

        entry = cursor.next()?;
    }
    Ok(sets)
}

/// The 40-byte `hashed address ‖ incarnation` prefix of the storage trie
/// and hashed-storage tables.
pub fn storage_trie_prefix(hashed_address: B256, incarnation: u64) -> Vec<u8> {
    Encode::encode(HashedStoragePrefix::new(hashed_address, incarnation)).to_vec()
}
