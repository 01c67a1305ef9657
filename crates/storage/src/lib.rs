//! Typed accessor layer over the ordered key/value store.
//!
//! Tables carry the names fixed by the on-disk format; keys use the fixed
//! encodings (big-endian block numbers, address ‖ incarnation storage
//! prefixes); values are canonical RLP or the storage-compatible compact
//! encodings. One exclusive writer at a time owns a [`StoreTx`]; readers
//! open snapshots through [`Store::ro_tx`].

mod env;
mod error;
mod genesis;
mod keys;
mod models;
mod provider;
mod tables;

pub use env::{RoTx, RwTx, Store, StoreTx, SCHEMA_VERSION};
pub use error::StorageError;
pub use genesis::{initialize_genesis, read_chain_config, update_chain_config};
pub use keys::{
    AccountHistoryKey, BlockKey, HashedStoragePrefix, RawKey, StorageChangeKey, StorageHistoryKey,
    StoragePrefix, ADDRESS_LENGTH, HASH_LENGTH, INCARNATION_LENGTH,
};
pub use models::{HashValue, RawValue, RlpValue, StoredBlockBody, U64Value};
pub use provider::{
    bitmap_seek, decode_account_changes, decode_storage_changes, increment_sequence,
    read_schema_version, read_sequence, read_snapshots, read_stage_progress, reset_sequence,
    write_schema_version, write_snapshots, write_stage_progress, ChainProvider, SchemaVersion,
    StateProvider, StateWriter, StorageChanges, DB_SCHEMA_VERSION_KEY, DB_SNAPSHOTS_KEY,
};
pub use tables::*;
