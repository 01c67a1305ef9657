//! Table declarations.
//!
//! Names are fixed for on-disk compatibility. Multi-value (dup-sorted)
//! tables keep duplicate values per key in lexicographic order:
//! `PlainState` and `HashedStorage` for per-incarnation storage rows,
//! `AccountChangeSet`/`StorageChangeSet` for per-block prior values.

use crate::{
    keys::{
        AccountHistoryKey, BlockKey, HashedStoragePrefix, RawKey, StorageChangeKey,
        StorageHistoryKey, StoragePrefix,
    },
    models::{HashValue, RawValue, RlpValue, StoredBlockBody, U64Value},
};
use alloy_primitives::{Address, B256, U256};
use corten_primitives::{BlockHeader, Transaction};
use reth_db_api::table::{DupSort, Table};
use serde::{Deserialize, Serialize};

/// Declares a table type with its on-disk name, key and value types.
macro_rules! table {
    ($(#[$docs:meta])* $name:ident => $key:ty, $value:ty) => {
        $(#[$docs])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name;

        impl Table for $name {
            const NAME: &'static str = stringify!($name);
            const DUPSORT: bool = false;
            type Key = $key;
            type Value = $value;
        }
    };
    ($(#[$docs:meta])* $name:ident => $key:ty, $value:ty, subkey = $subkey:ty) => {
        $(#[$docs])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name;

        impl Table for $name {
            const NAME: &'static str = stringify!($name);
            const DUPSORT: bool = true;
            type Key = $key;
            type Value = $value;
        }

        impl DupSort for $name {
            type SubKey = $subkey;
        }
    };
}

/// Implements `TableInfo` for the given tables so the schema layer can
/// introspect them.
macro_rules! impl_table_info {
    ($($table:ty),+ $(,)?) => {
        $(
            impl reth_db_api::table::TableInfo for $table {
                fn name(&self) -> &'static str {
                    <$table as Table>::NAME
                }

                fn is_dupsort(&self) -> bool {
                    <$table as Table>::DUPSORT
                }
            }
        )+
    };
}

/// Declares the full table set used to initialize the database.
macro_rules! impl_table_set {
    ($set_name:ident, $($table:ty),+ $(,)?) => {
        /// The tables initialized together when an environment is opened.
        #[derive(Debug, Clone, Copy)]
        pub struct $set_name;

        impl reth_db_api::TableSet for $set_name {
            fn tables() -> Box<dyn Iterator<Item = Box<dyn reth_db_api::table::TableInfo>>> {
                Box::new(vec![
                    $(
                        Box::new(<$table>::default()) as Box<dyn reth_db_api::table::TableInfo>
                    ),*
                ].into_iter())
            }
        }
    };
}

table! {
    /// Well-known keys: `"dbVersion"`, `"snapshots"`.
    DatabaseInfo => RawKey, RawValue
}

table! {
    /// `(number ‖ hash)` → RLP-encoded header.
    Headers => BlockKey, RlpValue<BlockHeader>
}

table! {
    /// Header hash → block number.
    HeaderNumbers => B256, U64Value
}

table! {
    /// Block number → canonical header hash.
    CanonicalHashes => u64, HashValue
}

table! {
    /// `(number ‖ hash)` → stored body referencing the transactions table.
    BlockBodies => BlockKey, RlpValue<StoredBlockBody>
}

table! {
    /// Sequence-assigned transaction id → RLP-encoded transaction.
    BlockTransactions => u64, RlpValue<Transaction>
}

table! {
    /// `(number ‖ hash)` → concatenated 20-byte sender addresses.
    Senders => BlockKey, RawValue
}

table! {
    /// `(number ‖ hash)` → RLP-encoded total difficulty.
    Difficulty => BlockKey, RlpValue<U256>
}

table! {
    /// Code hash → contract byte code.
    Code => B256, RawValue
}

table! {
    /// Current state. Account rows are keyed by the 20-byte address;
    /// storage rows are keyed by the 28-byte `address ‖ incarnation`
    /// prefix with `location ‖ zeroless value` duplicates.
    PlainState => RawKey, RawValue, subkey = B256
}

table! {
    /// `address ‖ incarnation` → code hash of the contract.
    PlainCodeHash => StoragePrefix, HashValue
}

table! {
    /// `address ‖ shard upper bound` → bitmap of change block numbers.
    AccountHistory => AccountHistoryKey, RawValue
}

table! {
    /// `address ‖ location ‖ shard upper bound` → bitmap of change blocks.
    StorageHistory => StorageHistoryKey, RawValue
}

table! {
    /// Block number → `address ‖ prior account encoding` duplicates.
    AccountChangeSet => u64, RawValue, subkey = Address
}

table! {
    /// `(block ‖ address ‖ incarnation)` → `location ‖ prior value`.
    StorageChangeSet => StorageChangeKey, RawValue, subkey = B256
}

table! {
    /// Address → incarnation of the last self-destructed contract.
    IncarnationMap => Address, U64Value
}

table! {
    /// Keccak-hashed address → account encoding.
    HashedAccounts => B256, RawValue
}

table! {
    /// `hashed address ‖ incarnation` → `hashed location ‖ value`.
    HashedStorage => HashedStoragePrefix, RawValue, subkey = B256
}

table! {
    /// Nibble path → marshalled account trie node.
    TrieOfAccounts => RawKey, RawValue
}

table! {
    /// `hashed address ‖ incarnation ‖ nibble path` → storage trie node.
    TrieOfStorage => RawKey, RawValue
}

table! {
    /// Table name → monotonically increasing sequence value.
    Sequence => RawKey, U64Value
}

table! {
    /// Genesis hash → chain-config JSON document.
    Config => B256, RawValue
}

table! {
    /// Single well-known key holding the highest head header hash.
    HeadHeader => RawKey, HashValue
}

table! {
    /// Stage key → progress block number.
    SyncStage => RawKey, U64Value
}

impl_table_info!(
    DatabaseInfo,
    Headers,
    HeaderNumbers,
    CanonicalHashes,
    BlockBodies,
    BlockTransactions,
    Senders,
    Difficulty,
    Code,
    PlainState,
    PlainCodeHash,
    AccountHistory,
    StorageHistory,
    AccountChangeSet,
    StorageChangeSet,
    IncarnationMap,
    HashedAccounts,
    HashedStorage,
    TrieOfAccounts,
    TrieOfStorage,
    Sequence,
    Config,
    HeadHeader,
    SyncStage,
);

impl_table_set!(
    Tables,
    DatabaseInfo,
    Headers,
    HeaderNumbers,
    CanonicalHashes,
    BlockBodies,
    BlockTransactions,
    Senders,
    Difficulty,
    Code,
    PlainState,
    PlainCodeHash,
    AccountHistory,
    StorageHistory,
    AccountChangeSet,
    StorageChangeSet,
    IncarnationMap,
    HashedAccounts,
    HashedStorage,
    TrieOfAccounts,
    TrieOfStorage,
    Sequence,
    Config,
    HeadHeader,
    SyncStage,
);
