//! The trie loader: computes the state root over the hashed state and
//! maintains the intermediate-node tables.

use crate::{
    etl::Collector, node::StoredNode, pack_nibbles, prefix_set::PrefixSet, unpack_nibbles,
    StoragePrefixSets, TrieError,
};
use alloy_primitives::{hex, keccak256, B256, U256};
use alloy_trie::{
    nodes::{BranchNode, ExtensionNode, LeafNode, RlpNode},
    Nibbles, TrieMask,
};
use corten_primitives::{Account, EMPTY_ROOT};
use corten_storage::{
    HashedAccounts, HashedStorage, HashedStoragePrefix, RawKey, RawValue, TrieOfAccounts,
    TrieOfStorage,
};
use reth_db_api::{
    cursor::{DbCursorRO, DbDupCursorRO},
    table::Decode,
    transaction::{DbTx, DbTxMut},
};
use std::sync::{Arc, Mutex};

/// Number of nibbles in a hashed key.
const KEY_NIBBLES: usize = 64;

/// One position of the subtree being hashed: either a leaf of the hashed
/// state or an unchanged subtree reused through its stored root hash.
#[derive(Debug)]
enum Item {
    Leaf { path: Vec<u8>, value: Vec<u8> },
    Cached { path: Vec<u8>, hash: B256 },
}

impl Item {
    fn path(&self) -> &[u8] {
        match self {
            Self::Leaf { path, .. } | Self::Cached { path, .. } => path,
        }
    }
}

/// Which trie a walk operates on.
#[derive(Debug, Clone)]
enum Trie {
    Accounts,
    /// Storage subtree of one `hashed address ‖ incarnation` prefix.
    Storage(Vec<u8>),
}

impl Trie {
    fn table_key(&self, path: &[u8]) -> RawKey {
        match self {
            Self::Accounts => RawKey(path.to_vec()),
            Self::Storage(prefix) => {
                let mut key = Vec::with_capacity(prefix.len() + path.len());
                key.extend_from_slice(prefix);
                key.extend_from_slice(path);
                RawKey(key)
            }
        }
    }
}

/// Computes the Merkle-Patricia state root, fully or incrementally.
///
/// In incremental mode the prefix sets delimit the regions whose leaves
/// are re-walked; stored node records along re-walked paths are deleted as
/// the walk passes them, and every other subtree is reused through its
/// stored hash. Fresh node records land in the two collectors and are
/// only flushed to the tables by the caller once the produced root has
/// been accepted.
#[derive(Debug)]
pub struct TrieLoader<'tx, TX> {
    tx: &'tx TX,
    account_changes: Option<PrefixSet>,
    storage_changes: StoragePrefixSets,
    account_collector: Collector,
    storage_collector: Collector,
    log_key: Arc<Mutex<String>>,
}

impl<'tx, TX: DbTx + DbTxMut> TrieLoader<'tx, TX> {
    /// Creates a loader. `account_changes = None` requests a full
    /// regeneration over cleared trie tables; otherwise only the given
    /// prefixes are re-walked.
    pub fn new(
        tx: &'tx TX,
        account_changes: Option<PrefixSet>,
        storage_changes: StoragePrefixSets,
    ) -> Self {
        Self {
            tx,
            account_changes,
            storage_changes,
            account_collector: Collector::new(),
            storage_collector: Collector::new(),
            log_key: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Handle other threads may read to observe walk progress.
    pub fn progress_key(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.log_key)
    }

    /// Consumes the loader, yielding the account and storage collectors
    /// for flushing.
    pub fn into_collectors(self) -> (Collector, Collector) {
        (self.account_collector, self.storage_collector)
    }

    /// Computes the account-trie root.
    pub fn calculate_root(&mut self) -> Result<B256, TrieError> {
        let mut items = Vec::new();
        if self.account_changes.is_none() {
            // full regeneration over cleared tables
            self.push_account_leaves(&[], &mut items)?;
        } else {
            self.collect_items(&Trie::Accounts, Vec::new(), &mut items)?;
        }

        let mut records = Vec::new();
        let root = self.finish_subtree(&Trie::Accounts, items, &mut records)?;
        for (path, node) in records {
            self.account_collector.collect(path, node.encode())?;
        }
        Ok(root)
    }

    /// Root of one account's storage subtree, reusing the stored subtree
    /// root when the account's storage saw no changes.
    fn storage_root(&mut self, hashed_address: B256, incarnation: u64) -> Result<B256, TrieError> {
        if incarnation == 0 {
            return Ok(EMPTY_ROOT);
        }
        let prefix = crate::changes::storage_trie_prefix(hashed_address, incarnation);
        let trie = Trie::Storage(prefix.clone());

        let changed = self.storage_changes.contains_key(&prefix);
        let mut items = Vec::new();
        if changed {
            self.collect_items(&trie, Vec::new(), &mut items)?;
        } else {
            // untouched storage: the stored subtree root short-circuits
            if let Some(node) = self.stored_node(&trie, &[])? {
                if let Some(root) = node.root_hash {
                    return Ok(root);
                }
            }
            self.push_storage_leaves(&prefix, &[], &mut items)?;
        }

        let mut records = Vec::new();
        let root = self.finish_subtree(&trie, items, &mut records)?;
        for (path, node) in records {
            self.storage_collector.collect(path, node.encode())?;
        }
        Ok(root)
    }

    /// Hashes the collected items of one (sub)trie and appends the root
    /// record; the record key carries the storage prefix where relevant.
    fn finish_subtree(
        &mut self,
        trie: &Trie,
        items: Vec<Item>,
        records: &mut Vec<(Vec<u8>, StoredNode)>,
    ) -> Result<B256, TrieError> {
        if items.is_empty() {
            return Ok(EMPTY_ROOT);
        }
        if let [Item::Cached { path, hash }] = items.as_slice() {
            if path.is_empty() {
                return Ok(*hash);
            }
        }

        let mut built = Vec::new();
        let top = hash_items(&items, 0, &mut built);
        let root = match top.as_hash() {
            Some(hash) => hash,
            None => keccak256(&top[..]),
        };

        let mut has_root_record = false;
        for (path, mut node) in built {
            if path.is_empty() {
                node.root_hash = Some(root);
                has_root_record = true;
            }
            records.push((trie.table_key(&path).0, node));
        }
        if !has_root_record {
            records.push((trie.table_key(&[]).0, StoredNode::root_only(root)));
        }
        Ok(root)
    }

    fn changed(&mut self, trie: &Trie, prefix: &[u8]) -> bool {
        match trie {
            Trie::Accounts => match &mut self.account_changes {
                Some(set) => set.contains(prefix),
                None => true,
            },
            Trie::Storage(storage_prefix) => self
                .storage_changes
                .get_mut(storage_prefix)
                .map(|set| set.contains(prefix))
                .unwrap_or(false),
        }
    }

    fn stored_node(&self, trie: &Trie, path: &[u8]) -> Result<Option<StoredNode>, TrieError> {
        let table_key = trie.table_key(path);
        let raw = match trie {
            Trie::Accounts => self.tx.get::<TrieOfAccounts>(table_key)?,
            Trie::Storage(_) => self.tx.get::<TrieOfStorage>(table_key)?,
        };
        raw.map(|RawValue(payload)| StoredNode::decode(&payload)).transpose().map_err(Into::into)
    }

    fn delete_node(&mut self, trie: &Trie, path: &[u8]) -> Result<(), TrieError> {
        let table_key = trie.table_key(path);
        match trie {
            Trie::Accounts => self.tx.delete::<TrieOfAccounts>(table_key, None)?,
            Trie::Storage(_) => self.tx.delete::<TrieOfStorage>(table_key, None)?,
        };
        Ok(())
    }

    /// Walks a changed region. Unchanged children are reused or
    /// enumerated in place; changed children are descended, their stale
    /// records deleted along the way.
    fn collect_items(
        &mut self,
        trie: &Trie,
        prefix: Vec<u8>,
        out: &mut Vec<Item>,
    ) -> Result<(), TrieError> {
        if self.stored_node(trie, &prefix)?.is_some() {
            self.delete_node(trie, &prefix)?;
        }
        if prefix.len() == KEY_NIBBLES {
            self.push_leaves(trie, &prefix, out)?;
            return Ok(());
        }
        for nibble in 0..16u8 {
            let mut child = prefix.clone();
            child.push(nibble);
            if self.changed(trie, &child) {
                if self.stored_node(trie, &child)?.is_some() || self.has_leaves(trie, &child)? {
                    self.collect_items(trie, child, out)?;
                }
            } else if let Some(hash) =
                self.stored_node(trie, &child)?.and_then(|node| node.root_hash)
            {
                out.push(Item::Cached { path: child, hash });
            } else {
                self.push_leaves(trie, &child, out)?;
            }
        }
        Ok(())
    }

    fn push_leaves(
        &mut self,
        trie: &Trie,
        prefix: &[u8],
        out: &mut Vec<Item>,
    ) -> Result<(), TrieError> {
        match trie {
            Trie::Accounts => self.push_account_leaves(prefix, out),
            Trie::Storage(storage_prefix) => {
                let storage_prefix = storage_prefix.clone();
                self.push_storage_leaves(&storage_prefix, prefix, out)
            }
        }
    }

    fn has_leaves(&mut self, trie: &Trie, prefix: &[u8]) -> Result<bool, TrieError> {
        match trie {
            Trie::Accounts => {
                let mut cursor = self.tx.cursor_read::<HashedAccounts>()?;
                match cursor.seek(lower_bound_key(prefix))? {
                    Some((key, _)) => Ok(unpack_nibbles(key.as_slice()).starts_with(prefix)),
                    None => Ok(false),
                }
            }
            Trie::Storage(storage_prefix) => {
                let table_key = HashedStoragePrefix::decode(storage_prefix)
                    .map_err(corten_storage::StorageError::Database)?;
                let mut cursor = self.tx.cursor_dup_read::<HashedStorage>()?;
                match cursor.seek_by_key_subkey(table_key, lower_bound_key(prefix))? {
                    Some(RawValue(row)) if row.len() >= 32 => {
                        Ok(unpack_nibbles(&row[..32]).starts_with(prefix))
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    fn push_account_leaves(
        &mut self,
        prefix: &[u8],
        out: &mut Vec<Item>,
    ) -> Result<(), TrieError> {
        let tx = self.tx;
        let mut cursor = tx.cursor_read::<HashedAccounts>()?;
        let mut pending = Vec::new();
        let mut entry = cursor.seek(lower_bound_key(prefix))?;
        while let Some((hashed_address, RawValue(encoded))) = entry {
            let path = unpack_nibbles(hashed_address.as_slice());
            if !path.starts_with(prefix) {
                break;
            }
            let account = Account::from_encoded_storage(&encoded)?;
            pending.push((hashed_address, path, account));
            entry = cursor.next()?;
        }
        drop(cursor);

        for (hashed_address, path, account) in pending {
            if let Ok(mut key) = self.log_key.lock() {
                *key = hex::encode(hashed_address);
            }
            let storage_root = self.storage_root(hashed_address, account.incarnation)?;
            out.push(Item::Leaf { path, value: account.rlp(storage_root) });
        }
        Ok(())
    }

    fn push_storage_leaves(
        &mut self,
        storage_prefix: &[u8],
        prefix: &[u8],
        out: &mut Vec<Item>,
    ) -> Result<(), TrieError> {
        let table_key = HashedStoragePrefix::decode(storage_prefix)
            .map_err(corten_storage::StorageError::Database)?;
        let mut cursor = self.tx.cursor_dup_read::<HashedStorage>()?;
        let mut row = cursor.seek_by_key_subkey(table_key, lower_bound_key(prefix))?;
        while let Some(RawValue(payload)) = row {
            if payload.len() < 32 {
                return Err(TrieError::Storage(corten_storage::StorageError::EntryNotFound(
                    "malformed hashed storage row",
                )));
            }
            let path = unpack_nibbles(&payload[..32]);
            if !path.starts_with(prefix) {
                break;
            }
            let value = U256::from_be_slice(&payload[32..]);
            out.push(Item::Leaf { path, value: alloy_rlp::encode(value) });
            row = cursor.next_dup_val()?;
        }
        Ok(())
    }
}

/// First 32-byte key at or above a nibble prefix.
fn lower_bound_key(prefix: &[u8]) -> B256 {
    let mut nibbles = prefix.to_vec();
    nibbles.resize(KEY_NIBBLES, 0);
    B256::from_slice(&pack_nibbles(&nibbles))
}

/// Builds the node rooted at `depth` over sorted, prefix-free items,
/// recording every branch node it creates.
fn hash_items(items: &[Item], depth: usize, records: &mut Vec<(Vec<u8>, StoredNode)>) -> RlpNode {
    debug_assert!(!items.is_empty());

    if let [item] = items {
        let path = item.path();
        return match item {
            Item::Leaf { value, .. } => {
                let leaf = LeafNode::new(Nibbles::from_nibbles(&path[depth..]), value.clone());
                RlpNode::from_rlp(&alloy_rlp::encode(&leaf))
            }
            Item::Cached { hash, .. } => {
                if path.len() == depth {
                    RlpNode::word_rlp(hash)
                } else {
                    let extension = ExtensionNode::new(
                        Nibbles::from_nibbles(&path[depth..]),
                        RlpNode::word_rlp(hash),
                    );
                    RlpNode::from_rlp(&alloy_rlp::encode(&extension))
                }
            }
        };
    }

    // sorted items: the longest common prefix is that of the extremes
    let first = items.first().map(|item| item.path()).unwrap_or_default();
    let last = items.last().map(|item| item.path()).unwrap_or_default();
    let lcp = first[depth..]
        .iter()
        .zip(&last[depth..])
        .take_while(|(a, b)| a == b)
        .count();
    if lcp > 0 {
        let child = hash_items(items, depth + lcp, records);
        let extension =
            ExtensionNode::new(Nibbles::from_nibbles(&first[depth..depth + lcp]), child);
        return RlpNode::from_rlp(&alloy_rlp::encode(&extension));
    }

    // a true branch: group items by the nibble at `depth`
    let mut stack = Vec::with_capacity(16);
    let mut state_mask = 0u16;
    let mut tree_mask = 0u16;
    let mut hash_mask = 0u16;
    let mut hashes = Vec::new();

    let mut start = 0usize;
    while start < items.len() {
        let nibble = items[start].path()[depth];
        let mut end = start;
        while end < items.len() && items[end].path()[depth] == nibble {
            end += 1;
        }
        let group = &items[start..end];

        let records_before = records.len();
        let child = hash_items(group, depth + 1, records);
        state_mask |= 1 << nibble;
        let cached_child =
            matches!(group, [Item::Cached { .. }]) || records.len() > records_before;
        if cached_child {
            tree_mask |= 1 << nibble;
        }
        if let Some(hash) = child.as_hash() {
            hash_mask |= 1 << nibble;
            hashes.push(hash);
        }
        stack.push(child);
        start = end;
    }

    let branch = BranchNode { stack, state_mask: TrieMask::new(state_mask) };
    let encoded = alloy_rlp::encode(&branch);
    let rlp_node = RlpNode::from_rlp(&encoded);
    records.push((
        first[..depth].to_vec(),
        StoredNode {
            state_mask,
            tree_mask,
            hash_mask,
            root_hash: rlp_node.as_hash(),
            hashes,
        },
    ));
    rlp_node
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{keccak256, Address, U256};
    use alloy_trie::{
        root::{state_root_unhashed, storage_root_unhashed},
        TrieAccount, EMPTY_ROOT_HASH, KECCAK_EMPTY,
    };
    use corten_storage::{StateWriter, Store};
    use reth_db_api::cursor::DbCursorRW;
    use reth_db_api::transaction::DbTxMut;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn account(balance: u64, nonce: u64) -> Account {
        Account { nonce, balance: U256::from(balance), ..Default::default() }
    }

    fn write_hashed_account<TX: DbTx + DbTxMut>(tx: &TX, address: Address, account: &Account) {
        tx.put::<HashedAccounts>(
            keccak256(address),
            RawValue(account.encode_for_storage(false)),
        )
        .unwrap();
    }

    fn write_hashed_storage<TX: DbTx + DbTxMut>(
        tx: &TX,
        address: Address,
        incarnation: u64,
        location: B256,
        value: U256,
    ) {
        let hashed_location = keccak256(location);
        let mut row = hashed_location.to_vec();
        let bytes = value.to_be_bytes::<32>();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(32);
        row.extend_from_slice(&bytes[first..]);
        tx.put::<HashedStorage>(
            HashedStoragePrefix::new(keccak256(address), incarnation),
            RawValue(row),
        )
        .unwrap();
    }

    fn expected_root(accounts: &BTreeMap<Address, (Account, BTreeMap<B256, U256>)>) -> B256 {
        state_root_unhashed(accounts.iter().map(|(address, (account, storage))| {
            let storage_root = if storage.is_empty() {
                EMPTY_ROOT_HASH
            } else {
                storage_root_unhashed(storage.iter().map(|(k, v)| (*k, *v)))
            };
            (
                *address,
                TrieAccount {
                    nonce: account.nonce,
                    balance: account.balance,
                    storage_root,
                    code_hash: KECCAK_EMPTY,
                },
            )
        }))
    }

    /// Flushes loader output into the trie tables, as the stage would.
    fn flush<TX: DbTx + DbTxMut>(tx: &TX, loader: TrieLoader<'_, TX>) {
        let (accounts, storage) = loader.into_collectors();
        accounts
            .load(|key, value| {
                tx.put::<TrieOfAccounts>(RawKey(key.to_vec()), RawValue(value.to_vec()))?;
                Ok(())
            })
            .unwrap();
        storage
            .load(|key, value| {
                tx.put::<TrieOfStorage>(RawKey(key.to_vec()), RawValue(value.to_vec()))?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn empty_state_yields_empty_root() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();
        let mut loader = TrieLoader::new(batch.tx(), None, StoragePrefixSets::new());
        assert_eq!(loader.calculate_root().unwrap(), EMPTY_ROOT);
    }

    #[test]
    fn full_regeneration_matches_reference_root() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        let mut world = BTreeMap::new();
        for i in 1u8..=40 {
            let address = Address::repeat_byte(i);
            let acct = account(1_000 + i as u64, i as u64);
            write_hashed_account(batch.tx(), address, &acct);
            world.insert(address, (acct, BTreeMap::new()));
        }

        let mut loader = TrieLoader::new(batch.tx(), None, StoragePrefixSets::new());
        assert_eq!(loader.calculate_root().unwrap(), expected_root(&world));
    }

    #[test]
    fn storage_roots_feed_account_leaves() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        let address = Address::repeat_byte(0x42);
        let contract = Account { incarnation: 1, ..account(5, 1) };
        write_hashed_account(batch.tx(), address, &contract);

        let mut slots = BTreeMap::new();
        for i in 1u8..=5 {
            let location = B256::with_last_byte(i);
            let value = U256::from(100u64 + i as u64);
            write_hashed_storage(batch.tx(), address, 1, location, value);
            slots.insert(location, value);
        }
        let mut world = BTreeMap::new();
        world.insert(address, (contract, slots));

        let mut loader = TrieLoader::new(batch.tx(), None, StoragePrefixSets::new());
        assert_eq!(loader.calculate_root().unwrap(), expected_root(&world));
    }

    #[test]
    fn incremental_update_matches_full_recomputation() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        let mut world = BTreeMap::new();
        for i in 1u8..=30 {
            let address = Address::repeat_byte(i);
            let acct = account(1_000 + i as u64, i as u64);
            write_hashed_account(batch.tx(), address, &acct);
            world.insert(address, (acct, BTreeMap::new()));
        }

        let mut loader = TrieLoader::new(batch.tx(), None, StoragePrefixSets::new());
        let first_root = loader.calculate_root().unwrap();
        assert_eq!(first_root, expected_root(&world));
        flush(batch.tx(), loader);

        // change one account, add one, delete one
        let mut changed = PrefixSet::new();

        let modified = Address::repeat_byte(7);
        let new_balance = account(9_999, 8);
        write_hashed_account(batch.tx(), modified, &new_balance);
        world.get_mut(&modified).unwrap().0 = new_balance;
        changed.insert(unpack_nibbles(keccak256(modified).as_slice()), false);

        let added = Address::repeat_byte(0xcd);
        let added_account = account(1, 0);
        write_hashed_account(batch.tx(), added, &added_account);
        world.insert(added, (added_account, BTreeMap::new()));
        changed.insert(unpack_nibbles(keccak256(added).as_slice()), true);

        let removed = Address::repeat_byte(21);
        batch.tx().delete::<HashedAccounts>(keccak256(removed), None).unwrap();
        world.remove(&removed);
        changed.insert(unpack_nibbles(keccak256(removed).as_slice()), false);

        let mut loader = TrieLoader::new(batch.tx(), Some(changed), StoragePrefixSets::new());
        let incremental_root = loader.calculate_root().unwrap();
        assert_eq!(incremental_root, expected_root(&world));
        flush(batch.tx(), loader);

        // a second incremental pass over fresh records still agrees
        let mut changed = PrefixSet::new();
        let touched = Address::repeat_byte(3);
        let bumped = account(123, 99);
        write_hashed_account(batch.tx(), touched, &bumped);
        world.get_mut(&touched).unwrap().0 = bumped;
        changed.insert(unpack_nibbles(keccak256(touched).as_slice()), false);

        let mut loader = TrieLoader::new(batch.tx(), Some(changed), StoragePrefixSets::new());
        assert_eq!(loader.calculate_root().unwrap(), expected_root(&world));
    }

    #[test]
    fn incremental_storage_change_matches_reference() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        let mut world = BTreeMap::new();
        let plain = Address::repeat_byte(0x01);
        let plain_account = account(10, 1);
        write_hashed_account(batch.tx(), plain, &plain_account);
        world.insert(plain, (plain_account, BTreeMap::new()));

        let contract = Address::repeat_byte(0x02);
        let contract_account = Account { incarnation: 1, ..account(20, 1) };
        write_hashed_account(batch.tx(), contract, &contract_account);
        let mut slots = BTreeMap::new();
        for i in 1u8..=8 {
            let location = B256::with_last_byte(i);
            let value = U256::from(7_000u64 + i as u64);
            write_hashed_storage(batch.tx(), contract, 1, location, value);
            slots.insert(location, value);
        }
        world.insert(contract, (contract_account, slots));

        let mut loader = TrieLoader::new(batch.tx(), None, StoragePrefixSets::new());
        assert_eq!(loader.calculate_root().unwrap(), expected_root(&world));
        flush(batch.tx(), loader);

        // change one slot; the account leaf re-hashes with a new storage root
        let location = B256::with_last_byte(3);
        let value = U256::from(1u64);
        // remove the stale duplicate row first
        {
            let mut cursor = batch.tx().cursor_dup_write::<HashedStorage>().unwrap();
            let key = HashedStoragePrefix::new(keccak256(contract), 1);
            if let Some(row) = cursor.seek_by_key_subkey(key, keccak256(location)).unwrap() {
                if row.0.starts_with(keccak256(location).as_slice()) {
                    cursor.delete_current().unwrap();
                }
            }
        }
        write_hashed_storage(batch.tx(), contract, 1, location, value);
        world.get_mut(&contract).unwrap().1.insert(location, value);

        let mut account_changes = PrefixSet::new();
        account_changes.insert(unpack_nibbles(keccak256(contract).as_slice()), false);
        let mut storage_changes = StoragePrefixSets::new();
        let prefix = crate::changes::storage_trie_prefix(keccak256(contract), 1);
        let mut set = PrefixSet::new();
        set.insert(unpack_nibbles(keccak256(location).as_slice()), false);
        storage_changes.insert(prefix, set);

        let mut loader = TrieLoader::new(batch.tx(), Some(account_changes), storage_changes);
        assert_eq!(loader.calculate_root().unwrap(), expected_root(&world));
    }

    #[test]
    fn unchanged_storage_reuses_stored_root() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        let contract = Address::repeat_byte(0x05);
        let contract_account = Account { incarnation: 1, ..account(50, 2) };
        write_hashed_account(batch.tx(), contract, &contract_account);
        write_hashed_storage(batch.tx(), contract, 1, B256::with_last_byte(1), U256::from(9u64));

        let mut loader = TrieLoader::new(batch.tx(), None, StoragePrefixSets::new());
        let root = loader.calculate_root().unwrap();
        flush(batch.tx(), loader);

        // re-hash the account (balance change) without touching storage:
        // the stored storage root must be reused and the root must match a
        // clean recomputation
        let richer = Account { balance: U256::from(51u64), ..contract_account };
        write_hashed_account(batch.tx(), contract, &richer);

        let mut changed = PrefixSet::new();
        changed.insert(unpack_nibbles(keccak256(contract).as_slice()), false);
        let mut incremental =
            TrieLoader::new(batch.tx(), Some(changed), StoragePrefixSets::new());
        let incremental_root = incremental.calculate_root().unwrap();

        let mut world = BTreeMap::new();
        let mut slots = BTreeMap::new();
        slots.insert(B256::with_last_byte(1), U256::from(9u64));
        world.insert(contract, (richer, slots));
        assert_eq!(incremental_root, expected_root(&world));
        assert_ne!(incremental_root, root);
    }
}
