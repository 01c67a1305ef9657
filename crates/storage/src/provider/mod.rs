//! Typed access paths over a transaction, in the spirit of the database
//! access layer the on-disk format comes from.

mod chain;
mod meta;
mod state;

pub use chain::ChainProvider;
pub use meta::{
    increment_sequence, read_schema_version, read_sequence, read_snapshots, read_stage_progress,
    reset_sequence, write_schema_version, write_snapshots, write_stage_progress, SchemaVersion,
    DB_SCHEMA_VERSION_KEY, DB_SNAPSHOTS_KEY,
};
pub use state::{
    bitmap_seek, decode_account_changes, decode_storage_changes, StateProvider, StateWriter,
    StorageChanges,
};
