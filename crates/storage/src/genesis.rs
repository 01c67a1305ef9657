//! Genesis initialization: persists the allocation, the genesis header and
//! the chain config under the genesis key.

use crate::{
    keys::{HashedStoragePrefix, RawKey},
    models::RawValue,
    provider::{ChainProvider, StateWriter},
    tables::{Config, HashedAccounts, HashedStorage},
    StorageError, HASH_LENGTH,
};
use alloy_primitives::{keccak256, B256};
use corten_chainspec::{ChainConfig, GenesisSpec};
use corten_primitives::{Account, BlockBody, DEFAULT_INCARNATION};
use reth_db_api::transaction::{DbTx, DbTxMut};
use tracing::info;

/// Materializes block zero from `spec`: allocation into the plain and
/// hashed state, genesis header, canonical hash, difficulty, head header
/// and the chain-config document. Idempotent: an already-initialized
/// database returns its existing genesis hash untouched.
pub fn initialize_genesis<TX: DbTx + DbTxMut>(
    tx: &TX,
    spec: &GenesisSpec,
) -> Result<B256, StorageError> {
    let chain = ChainProvider::new(tx);
    if let Some(existing) = chain.read_canonical_hash(0)? {
        return Ok(existing);
    }

    let state = StateWriter::new(tx);
    for (address, alloc) in &spec.alloc {
        let code_hash = if alloc.code.is_empty() {
            corten_primitives::EMPTY_HASH
        } else {
            keccak256(&alloc.code)
        };
        let incarnation = if alloc.code.is_empty() && alloc.storage.is_empty() {
            0
        } else {
            DEFAULT_INCARNATION
        };
        let account =
            Account { nonce: alloc.nonce, balance: alloc.balance, code_hash, incarnation };

        state.upsert_account(*address, Some(&account))?;
        if !alloc.code.is_empty() {
            state.write_code(code_hash, &alloc.code)?;
            state.write_code_hash(*address, incarnation, code_hash)?;
        }

        let hashed_address = keccak256(address);
        tx.put::<HashedAccounts>(
            hashed_address,
            RawValue(account.encode_for_storage(false)),
        )?;

        for (location, value) in &alloc.storage {
            if value.is_zero() {
                continue;
            }
            let value = B256::from(value.to_be_bytes::<32>());
            state.upsert_storage(*address, incarnation, *location, value)?;

            let hashed_location = keccak256(location);
            let mut row = Vec::with_capacity(HASH_LENGTH + 32);
            row.extend_from_slice(hashed_location.as_slice());
            let first_nonzero =
                value.iter().position(|byte| *byte != 0).unwrap_or(HASH_LENGTH);
            row.extend_from_slice(&value.as_slice()[first_nonzero..]);
            tx.put::<HashedStorage>(
                HashedStoragePrefix::new(hashed_address, incarnation),
                RawValue(row),
            )?;
        }
    }

    let header = spec.header();
    let hash = chain.write_header(&header)?;
    chain.write_canonical_hash(0, hash)?;
    chain.write_total_difficulty(0, hash, header.difficulty)?;
    chain.write_body(0, hash, &BlockBody::default())?;
    chain.write_head_header_hash(hash)?;

    let mut config = spec.config.clone();
    config.genesis_hash = Some(hash);
    update_chain_config(tx, &config)?;

    info!(target: "storage", chain_id = config.chain_id, genesis = %hash, "genesis initialized");
    Ok(hash)
}

/// Reads the chain config persisted under the genesis hash.
pub fn read_chain_config<TX: DbTx>(tx: &TX) -> Result<Option<ChainConfig>, StorageError> {
    let chain = ChainProvider::new(tx);
    let Some(genesis_hash) = chain.read_canonical_hash(0)? else {
        return Ok(None);
    };
    let Some(raw) = tx.get::<Config>(genesis_hash)? else {
        return Ok(None);
    };
    let document: serde_json::Value = serde_json::from_slice(&raw.0)
        .map_err(|_| StorageError::EntryNotFound("malformed chain config document"))?;
    Ok(ChainConfig::from_json(&document).map(|mut config| {
        config.genesis_hash = Some(genesis_hash);
        config
    }))
}

/// Writes the chain config under the genesis hash; a no-op until genesis
/// has been initialized.
pub fn update_chain_config<TX: DbTx + DbTxMut>(
    tx: &TX,
    config: &ChainConfig,
) -> Result<(), StorageError> {
    let chain = ChainProvider::new(tx);
    let Some(genesis_hash) = chain.read_canonical_hash(0)? else {
        return Ok(());
    };
    let document = config.to_json().to_string();
    tx.put::<Config>(genesis_hash, RawValue(document.into_bytes()))?;
    Ok(())
}
