//! Storage error surface.

use corten_primitives::DecodingError;
use reth_db_api::DatabaseError;
use thiserror::Error;

/// Failures surfaced by the storage layer.
///
/// Database and decoding failures are fatal to the enclosing write
/// transaction: callers abort without partial commit. `EntryNotFound` is
/// reserved for records whose absence indicates corruption; ordinary
/// lookups return `Option` instead.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying key/value store failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// The environment could not be created or opened.
    #[error("failed to initialize database: {0}")]
    Init(String),
    /// A record expected to be well-formed did not decode.
    #[error(transparent)]
    Decoding(#[from] DecodingError),
    /// A record that must exist was not found.
    #[error("entry not found: {0}")]
    EntryNotFound(&'static str),
    /// The on-disk schema is newer than this build understands.
    #[error("cannot downgrade database schema from {from} to {to}")]
    SchemaDowngrade {
        /// Version found on disk.
        from: String,
        /// Version of this build.
        to: String,
    },
    /// A sequence value was recorded with the wrong width.
    #[error("bad sequence value for table {0}")]
    BadSequenceValue(&'static str),
}
