//! The buffered intra-block state: a read-through cache over the plain
//! state that tracks original values for change sets and history.

use alloy_primitives::{keccak256, Address, B256, U256};
use corten_chainspec::Revision;
use corten_consensus::RewardState;
use corten_primitives::{Account, DEFAULT_INCARNATION, EMPTY_HASH};
use corten_storage::{StateProvider, StateWriter, StorageError};
use reth_db_api::transaction::{DbTx, DbTxMut};
use std::collections::{BTreeMap, BTreeSet};

/// Read access to the current state, as the buffer's backing store.
pub trait StateReader {
    /// Reads an account.
    fn read_account(&self, address: Address) -> Result<Option<Account>, StorageError>;
    /// Reads a storage slot.
    fn read_storage(
        &self,
        address: Address,
        incarnation: u64,
        location: B256,
    ) -> Result<B256, StorageError>;
    /// Reads code by hash.
    fn read_code(&self, code_hash: B256) -> Result<Option<Vec<u8>>, StorageError>;
    /// Reads the incarnation a previously destroyed contract reached.
    fn read_previous_incarnation(&self, address: Address) -> Result<Option<u64>, StorageError>;
}

/// [`StateReader`] over a database transaction.
#[derive(Debug)]
pub struct DbStateReader<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> DbStateReader<'tx, TX> {
    /// Creates a reader over `tx`.
    pub const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX: DbTx> StateReader for DbStateReader<'_, TX> {
    fn read_account(&self, address: Address) -> Result<Option<Account>, StorageError> {
        StateProvider::new(self.tx).read_account(address)
    }

    fn read_storage(
        &self,
        address: Address,
        incarnation: u64,
        location: B256,
    ) -> Result<B256, StorageError> {
        StateProvider::new(self.tx).read_storage(address, incarnation, location)
    }

    fn read_code(&self, code_hash: B256) -> Result<Option<Vec<u8>>, StorageError> {
        StateProvider::new(self.tx).read_code(code_hash)
    }

    fn read_previous_incarnation(&self, address: Address) -> Result<Option<u64>, StorageError> {
        StateProvider::new(self.tx).read_previous_incarnation(address, None)
    }
}

#[derive(Debug, Clone)]
struct AccountObject {
    initial: Option<Account>,
    current: Option<Account>,
}

#[derive(Debug, Clone, Copy)]
struct StorageSlot {
    initial: B256,
    current: B256,
    incarnation: u64,
}

/// Per-block buffered state.
///
/// Reads fall through to the backing [`StateReader`] once and are cached;
/// writes stay in the buffer until [`Self::write_to_db`] turns them into
/// plain-state rows, change-set entries and history-index updates.
pub struct IntraBlockState<'r> {
    reader: &'r dyn StateReader,
    objects: BTreeMap<Address, AccountObject>,
    storage: BTreeMap<Address, BTreeMap<B256, StorageSlot>>,
    new_code: BTreeMap<B256, Vec<u8>>,
    destroyed: BTreeMap<Address, u64>,
    touched: BTreeSet<Address>,
}

impl core::fmt::Debug for IntraBlockState<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntraBlockState")
            .field("objects", &self.objects.len())
            .field("storage", &self.storage.len())
            .field("destroyed", &self.destroyed.len())
            .finish()
    }
}

impl<'r> IntraBlockState<'r> {
    /// Creates an empty buffer over `reader`.
    pub fn new(reader: &'r dyn StateReader) -> Self {
        Self {
            reader,
            objects: BTreeMap::new(),
            storage: BTreeMap::new(),
            new_code: BTreeMap::new(),
            destroyed: BTreeMap::new(),
            touched: BTreeSet::new(),
        }
    }

    fn object(&mut self, address: Address) -> Result<&mut AccountObject, StorageError> {
        if !self.objects.contains_key(&address) {
            let initial = self.reader.read_account(address)?;
            self.objects.insert(address, AccountObject { initial, current: initial });
        }
        Ok(self.objects.get_mut(&address).expect("object just inserted"))
    }

    /// The current account record, if the account exists.
    pub fn get_account(&mut self, address: Address) -> Result<Option<Account>, StorageError> {
        Ok(self.object(address)?.current)
    }

    /// The current nonce; zero for missing accounts.
    pub fn get_nonce(&mut self, address: Address) -> Result<u64, StorageError> {
        Ok(self.get_account(address)?.map(|account| account.nonce).unwrap_or_default())
    }

    /// The current balance; zero for missing accounts.
    pub fn get_balance(&mut self, address: Address) -> Result<U256, StorageError> {
        Ok(self.get_account(address)?.map(|account| account.balance).unwrap_or_default())
    }

    /// Sets the nonce, creating the account if needed.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StorageError> {
        let object = self.object(address)?;
        let mut account = object.current.unwrap_or_default();
        account.nonce = nonce;
        object.current = Some(account);
        self.touched.insert(address);
        Ok(())
    }

    /// Credits `amount` wei, creating the account if needed.
    pub fn add_to_balance(&mut self, address: Address, amount: U256) -> Result<(), StorageError> {
        let object = self.object(address)?;
        let mut account = object.current.unwrap_or_default();
        account.balance += amount;
        object.current = Some(account);
        self.touched.insert(address);
        Ok(())
    }

    /// Debits `amount` wei; callers have verified the balance covers it.
    pub fn sub_from_balance(
        &mut self,
        address: Address,
        amount: U256,
    ) -> Result<(), StorageError> {
        let object = self.object(address)?;
        let mut account = object.current.unwrap_or_default();
        account.balance = account.balance.saturating_sub(amount);
        object.current = Some(account);
        self.touched.insert(address);
        Ok(())
    }

    /// Reads a storage slot of the account's current incarnation.
    pub fn get_storage(&mut self, address: Address, location: B256) -> Result<B256, StorageError> {
        let incarnation = match self.get_account(address)? {
            Some(account) if account.incarnation > 0 => account.incarnation,
            _ => return Ok(B256::ZERO),
        };
        if let Some(slot) = self.storage.get(&address).and_then(|slots| slots.get(&location)) {
            return Ok(slot.current);
        }
        let initial = self.reader.read_storage(address, incarnation, location)?;
        self.storage
            .entry(address)
            .or_default()
            .insert(location, StorageSlot { initial, current: initial, incarnation });
        Ok(initial)
    }

    /// Writes a storage slot of the account's current incarnation.
    pub fn set_storage(
        &mut self,
        address: Address,
        location: B256,
        value: B256,
    ) -> Result<(), StorageError> {
        // populate the slot cache with the prior value first
        self.get_storage(address, location)?;
        if let Some(slot) = self.storage.get_mut(&address).and_then(|slots| slots.get_mut(&location))
        {
            slot.current = value;
        }
        self.touched.insert(address);
        Ok(())
    }

    /// Installs code on an account.
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) -> Result<(), StorageError> {
        let code_hash = keccak256(&code);
        self.new_code.insert(code_hash, code);
        let object = self.object(address)?;
        let mut account = object.current.unwrap_or_default();
        account.code_hash = code_hash;
        if account.incarnation == 0 {
            account.incarnation = DEFAULT_INCARNATION;
        }
        object.current = Some(account);
        self.touched.insert(address);
        Ok(())
    }

    /// Creates a contract account, bumping past any previously destroyed
    /// incarnation.
    pub fn create_contract(&mut self, address: Address) -> Result<(), StorageError> {
        let previous = self.reader.read_previous_incarnation(address)?.unwrap_or_default();
        let object = self.object(address)?;
        let balance = object.current.map(|account| account.balance).unwrap_or_default();
        object.current = Some(Account {
            nonce: 0,
            balance,
            code_hash: EMPTY_HASH,
            incarnation: previous.max(DEFAULT_INCARNATION - 1) + 1,
        });
        self.touched.insert(address);
        Ok(())
    }

    /// Destroys a contract: its record disappears and its storage is wiped
    /// at write-back.
    pub fn destruct(&mut self, address: Address) -> Result<(), StorageError> {
        let current = self.object(address)?.current;
        if let Some(account) = current {
            if account.incarnation > 0 {
                self.destroyed.insert(address, account.incarnation);
            }
        }
        if let Some(object) = self.objects.get_mut(&address) {
            object.current = None;
        }
        self.storage.remove(&address);
        self.touched.insert(address);
        Ok(())
    }

    /// Marks an account as touched without changing it.
    pub fn touch(&mut self, address: Address) {
        self.touched.insert(address);
    }

    fn is_empty(account: &Account) -> bool {
        account.nonce == 0 && account.balance.is_zero() && account.code_hash == EMPTY_HASH
    }

    /// Flushes the buffer: change sets first (prior values), then the
    /// plain state, code, incarnation map and history indices.
    pub fn write_to_db<TX: DbTx + DbTxMut>(
        mut self,
        tx: &TX,
        block_number: u64,
        revision: Revision,
    ) -> Result<(), StorageError> {
        let writer = StateWriter::new(tx);

        // EIP-161: touched empty accounts vanish
        if revision >= Revision::SpuriousDragon {
            for address in self.touched.clone() {
                if let Some(object) = self.objects.get_mut(&address) {
                    if object.current.as_ref().is_some_and(Self::is_empty) {
                        object.current = None;
                    }
                }
            }
        }

        for (address, object) in &self.objects {
            let changed = object.initial != object.current;
            if !changed {
                continue;
            }
            let prior = object
                .initial
                .as_ref()
                .map(|account| account.encode_for_storage(false))
                .unwrap_or_default();
            writer.write_account_change(block_number, *address, &prior)?;
            writer.index_account_change(*address, block_number)?;
            writer.upsert_account(*address, object.current.as_ref())?;

            if let Some(account) = &object.current {
                if let Some(code) = self.new_code.get(&account.code_hash) {
                    writer.write_code(account.code_hash, code)?;
                    writer.write_code_hash(*address, account.incarnation, account.code_hash)?;
                }
            }
        }

        for (address, incarnation) in &self.destroyed {
            writer.wipe_storage(*address, *incarnation)?;
            writer.write_incarnation(*address, *incarnation)?;
        }

        for (address, slots) in &self.storage {
            for (location, slot) in slots {
                if slot.initial == slot.current {
                    continue;
                }
                writer.write_storage_change(
                    block_number,
                    *address,
                    slot.incarnation,
                    *location,
                    slot.initial,
                )?;
                writer.index_storage_change(*address, *location, block_number)?;
                writer.upsert_storage(*address, slot.incarnation, *location, slot.current)?;
            }
        }
        Ok(())
    }
}

impl RewardState for IntraBlockState<'_> {
    fn add_balance(&mut self, address: Address, amount: U256) {
        // reward credits ride the same buffered path; the read-through
        // cannot fail other than on storage corruption, which the flush
        // surfaces anyway
        let _ = self.add_to_balance(address, amount);
    }

    fn touch(&mut self, address: Address) {
        self.touched.insert(address);
    }
}
