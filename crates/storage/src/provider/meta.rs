//! Schema version, snapshot list, sequence counters and stage progress.

use crate::{
    keys::RawKey,
    models::{RawValue, U64Value},
    tables::{DatabaseInfo, Sequence, SyncStage},
    StorageError,
};
use reth_db_api::transaction::{DbTx, DbTxMut};

/// Well-known `DatabaseInfo` key of the schema version.
pub const DB_SCHEMA_VERSION_KEY: &str = "dbVersion";

/// Well-known `DatabaseInfo` key of the snapshot file list.
pub const DB_SNAPSHOTS_KEY: &str = "snapshots";

/// A `major.minor.patch` schema version, stored as three big-endian u32s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    /// Incompatible layout changes.
    pub major: u32,
    /// Backward-compatible layout additions.
    pub minor: u32,
    /// Fixes with no layout impact.
    pub patch: u32,
}

impl core::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Reads the recorded schema version, if any.
pub fn read_schema_version<TX: DbTx>(tx: &TX) -> Result<Option<SchemaVersion>, StorageError> {
    let Some(raw) = tx.get::<DatabaseInfo>(RawKey::from_name(DB_SCHEMA_VERSION_KEY))? else {
        return Ok(None);
    };
    if raw.0.len() != 12 {
        return Err(StorageError::EntryNotFound("malformed dbVersion record"));
    }
    let part = |i: usize| {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&raw.0[i * 4..i * 4 + 4]);
        u32::from_be_bytes(bytes)
    };
    Ok(Some(SchemaVersion { major: part(0), minor: part(1), patch: part(2) }))
}

/// Records the schema version.
pub fn write_schema_version<TX: DbTxMut>(
    tx: &TX,
    version: SchemaVersion,
) -> Result<(), StorageError> {
    let mut value = Vec::with_capacity(12);
    value.extend_from_slice(&version.major.to_be_bytes());
    value.extend_from_slice(&version.minor.to_be_bytes());
    value.extend_from_slice(&version.patch.to_be_bytes());
    tx.put::<DatabaseInfo>(RawKey::from_name(DB_SCHEMA_VERSION_KEY), RawValue(value))?;
    Ok(())
}

/// Reads the list of snapshot file names.
pub fn read_snapshots<TX: DbTx>(tx: &TX) -> Result<Vec<String>, StorageError> {
    let Some(raw) = tx.get::<DatabaseInfo>(RawKey::from_name(DB_SNAPSHOTS_KEY))? else {
        return Ok(Vec::new());
    };
    serde_json::from_slice(&raw.0)
        .map_err(|_| StorageError::EntryNotFound("malformed snapshots record"))
}

/// Writes the list of snapshot file names.
pub fn write_snapshots<TX: DbTxMut>(tx: &TX, names: &[String]) -> Result<(), StorageError> {
    let value = serde_json::to_vec(names)
        .map_err(|_| StorageError::EntryNotFound("unserializable snapshots list"))?;
    tx.put::<DatabaseInfo>(RawKey::from_name(DB_SNAPSHOTS_KEY), RawValue(value))?;
    Ok(())
}

/// Returns the current sequence value for a table name and adds
/// `increment` for the next caller. The initial value of any name is 0;
/// changes are invisible until the transaction commits.
pub fn increment_sequence<TX: DbTx + DbTxMut>(
    tx: &TX,
    table_name: &'static str,
    increment: u64,
) -> Result<u64, StorageError> {
    let current = read_sequence(tx, table_name)?;
    if increment > 0 {
        tx.put::<Sequence>(RawKey::from_name(table_name), U64Value(current + increment))?;
    }
    Ok(current)
}

/// Reads the current sequence value for a table name.
pub fn read_sequence<TX: DbTx>(tx: &TX, table_name: &'static str) -> Result<u64, StorageError> {
    match tx.get::<Sequence>(RawKey::from_name(table_name)) {
        Ok(Some(value)) => Ok(value.0),
        Ok(None) => Ok(0),
        Err(_) => Err(StorageError::BadSequenceValue(table_name)),
    }
}

/// Resets the sequence for a table name, returning the prior value.
pub fn reset_sequence<TX: DbTx + DbTxMut>(
    tx: &TX,
    table_name: &'static str,
    new_value: u64,
) -> Result<u64, StorageError> {
    let current = read_sequence(tx, table_name)?;
    if new_value != current {
        tx.put::<Sequence>(RawKey::from_name(table_name), U64Value(new_value))?;
    }
    Ok(current)
}

/// Reads a stage's progress block number; absent means 0.
pub fn read_stage_progress<TX: DbTx>(tx: &TX, stage_key: &str) -> Result<u64, StorageError> {
    Ok(tx.get::<SyncStage>(RawKey::from_name(stage_key))?.map(|v| v.0).unwrap_or_default())
}

/// Writes a stage's progress block number.
pub fn write_stage_progress<TX: DbTxMut>(
    tx: &TX,
    stage_key: &str,
    progress: u64,
) -> Result<(), StorageError> {
    tx.put::<SyncStage>(RawKey::from_name(stage_key), U64Value(progress))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use tempfile::TempDir;

    #[test]
    fn sequence_is_monotonic_and_returns_old_value() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();
        let tx = batch.tx();

        assert_eq!(read_sequence(tx, "BlockTransactions").unwrap(), 0);
        assert_eq!(increment_sequence(tx, "BlockTransactions", 3).unwrap(), 0);
        assert_eq!(increment_sequence(tx, "BlockTransactions", 2).unwrap(), 3);
        assert_eq!(read_sequence(tx, "BlockTransactions").unwrap(), 5);
        assert_eq!(reset_sequence(tx, "BlockTransactions", 1).unwrap(), 5);
        assert_eq!(read_sequence(tx, "BlockTransactions").unwrap(), 1);

        // zero increment does not bump
        assert_eq!(increment_sequence(tx, "BlockTransactions", 0).unwrap(), 1);
        assert_eq!(read_sequence(tx, "BlockTransactions").unwrap(), 1);
    }

    #[test]
    fn sequence_changes_invisible_until_commit() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let batch = store.begin_rw().unwrap();
        increment_sequence(batch.tx(), "BlockTransactions", 10).unwrap();

        let ro = store.ro_tx().unwrap();
        assert_eq!(read_sequence(&ro, "BlockTransactions").unwrap(), 0);

        batch.commit_and_stop().unwrap();
        let ro = store.ro_tx().unwrap();
        assert_eq!(read_sequence(&ro, "BlockTransactions").unwrap(), 10);
    }

    #[test]
    fn stage_progress_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        assert_eq!(read_stage_progress(batch.tx(), "Execution").unwrap(), 0);
        write_stage_progress(batch.tx(), "Execution", 42).unwrap();
        assert_eq!(read_stage_progress(batch.tx(), "Execution").unwrap(), 42);
    }

    #[test]
    fn snapshots_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let batch = store.begin_rw().unwrap();

        assert!(read_snapshots(batch.tx()).unwrap().is_empty());
        let names = vec!["headers-000000-000500.seg".to_string()];
        write_snapshots(batch.tx(), &names).unwrap();
        assert_eq!(read_snapshots(batch.tx()).unwrap(), names);
    }
}
