//! Database environment and write-transaction handles.

use crate::{provider::SchemaVersion, tables::Tables, StorageError};
use reth_db::{
    mdbx::{init_db_for, DatabaseArguments},
    DatabaseEnv,
};
use reth_db_api::Database;
use std::path::Path;
use tracing::{debug, info};

/// Schema version written into `DatabaseInfo` on creation; opening a
/// database recorded with a newer version is fatal.
pub const SCHEMA_VERSION: SchemaVersion = SchemaVersion { major: 1, minor: 0, patch: 0 };

/// Read-only transaction handle of the environment.
pub type RoTx = <DatabaseEnv as Database>::TX;

/// Read-write transaction handle of the environment.
pub type RwTx = <DatabaseEnv as Database>::TXMut;

/// An opened database environment.
///
/// Read transactions observe the snapshot taken at `begin`; write
/// transactions serialize; the pipeline is the one exclusive writer.
#[derive(Debug)]
pub struct Store {
    env: DatabaseEnv,
}

impl Store {
    /// Creates or opens the environment at `path` and initializes the
    /// table set. Bumps the recorded schema version forward; refuses to
    /// downgrade.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let env = init_db_for::<_, Tables>(path, DatabaseArguments::default())
            .map_err(|err| StorageError::Init(err.to_string()))?;
        let store = Self { env };

        let tx = store.env.tx_mut()?;
        let recorded = crate::provider::read_schema_version(&tx)?;
        match recorded {
            Some(version) if version > SCHEMA_VERSION => {
                return Err(StorageError::SchemaDowngrade {
                    from: version.to_string(),
                    to: SCHEMA_VERSION.to_string(),
                });
            }
            Some(version) if version == SCHEMA_VERSION => {
                debug!(target: "storage", %version, "schema version up to date");
            }
            _ => {
                crate::provider::write_schema_version(&tx, SCHEMA_VERSION)?;
                info!(target: "storage", version = %SCHEMA_VERSION, "schema version recorded");
            }
        }
        tx.commit()?;
        Ok(store)
    }

    /// Begins a read-only transaction.
    pub fn ro_tx(&self) -> Result<RoTx, StorageError> {
        Ok(self.env.tx()?)
    }

    /// Begins the exclusive write transaction.
    pub fn begin_rw(&self) -> Result<StoreTx<'_>, StorageError> {
        Ok(StoreTx { env: &self.env, inner: Some(self.env.tx_mut()?), commit_disabled: false })
    }
}

/// The long-lived write transaction of the pipeline.
///
/// `commit_and_renew` keeps long work alive without holding one
/// transaction forever; disabling commit batches several stages
/// atomically, turning intermediate commits into no-ops.
#[derive(Debug)]
pub struct StoreTx<'db> {
    env: &'db DatabaseEnv,
    inner: Option<RwTx>,
    commit_disabled: bool,
}

impl StoreTx<'_> {
    /// The underlying transaction. The handle is always live between
    /// public calls; a missing one means the store was torn mid-commit,
    /// which is a process-fatal invariant violation.
    pub fn tx(&self) -> &RwTx {
        self.inner.as_ref().expect("write transaction is live")
    }

    /// Disables commit: subsequent [`Self::commit_and_renew`] calls become
    /// no-ops until re-enabled.
    pub fn disable_commit(&mut self) {
        self.commit_disabled = true;
    }

    /// Re-enables commit.
    pub fn enable_commit(&mut self) {
        self.commit_disabled = false;
    }

    /// Whether commit is currently disabled.
    pub fn commit_disabled(&self) -> bool {
        self.commit_disabled
    }

    /// Commits the transaction and immediately begins a new one.
    pub fn commit_and_renew(&mut self) -> Result<(), StorageError> {
        if self.commit_disabled {
            return Ok(());
        }
        if let Some(tx) = self.inner.take() {
            tx.commit()?;
        }
        self.inner = Some(self.env.tx_mut()?);
        Ok(())
    }

    /// Commits without renewing; the handle is spent afterwards.
    pub fn commit_and_stop(mut self) -> Result<(), StorageError> {
        if let Some(tx) = self.inner.take() {
            tx.commit()?;
        }
        Ok(())
    }

    /// Aborts the transaction, discarding uncommitted writes.
    pub fn abort(mut self) {
        if let Some(tx) = self.inner.take() {
            tx.abort();
        }
    }

    /// Discards uncommitted writes and begins a fresh transaction.
    pub fn rollback_and_renew(&mut self) -> Result<(), StorageError> {
        if let Some(tx) = self.inner.take() {
            tx.abort();
        }
        self.inner = Some(self.env.tx_mut()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CanonicalHashes, HashValue};
    use alloy_primitives::B256;
    use reth_db_api::transaction::{DbTx, DbTxMut};
    use tempfile::TempDir;

    #[test]
    fn open_creates_tables_and_schema_version() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let tx = store.ro_tx().unwrap();
        let version = crate::provider::read_schema_version(&tx).unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        drop(Store::open(dir.path()).unwrap());
        assert!(Store::open(dir.path()).is_ok());
    }

    #[test]
    fn disabled_commit_discards_nothing_until_reenabled() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let mut batch = store.begin_rw().unwrap();
        batch.disable_commit();
        batch.tx().put::<CanonicalHashes>(7, HashValue(B256::repeat_byte(1))).unwrap();
        batch.commit_and_renew().unwrap(); // no-op
        batch.enable_commit();
        batch.commit_and_renew().unwrap();
        batch.commit_and_stop().unwrap();

        let tx = store.ro_tx().unwrap();
        assert_eq!(tx.get::<CanonicalHashes>(7).unwrap(), Some(HashValue(B256::repeat_byte(1))));
    }

    #[test]
    fn abort_discards_writes() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let batch = store.begin_rw().unwrap();
        batch.tx().put::<CanonicalHashes>(9, HashValue(B256::repeat_byte(2))).unwrap();
        batch.abort();

        let tx = store.ro_tx().unwrap();
        assert_eq!(tx.get::<CanonicalHashes>(9).unwrap(), None);
    }
}
