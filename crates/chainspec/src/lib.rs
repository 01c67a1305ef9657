//! Chain configuration and deterministic hard-fork revision selection.
//!
//! A [`ChainConfig`] maps `(block_number, block_time)` to the [`Revision`]
//! that gates every validation rule, and the process-wide registry exposes
//! the configurations of the known networks.

mod chains;
mod config;
mod genesis;
mod revision;

pub use chains::{
    known_chain_by_id, known_chain_by_name, known_chains, GOERLI_CONFIG, GOERLI_GENESIS_HASH,
    MAINNET_CONFIG, MAINNET_GENESIS_HASH, RINKEBY_CONFIG, RINKEBY_GENESIS_HASH, SEPOLIA_CONFIG,
    SEPOLIA_GENESIS_HASH,
};
pub use config::{ChainConfig, SealEngineType};
pub use genesis::{genesis_spec_for_chain, GenesisAccount, GenesisSpec, INITIAL_BASE_FEE};
pub use revision::Revision;
