//! The process-wide registry of known chains.

use crate::{ChainConfig, SealEngineType};
use alloy_primitives::{b256, uint, B256};
use std::collections::BTreeMap;

/// Hash of the mainnet genesis block.
pub const MAINNET_GENESIS_HASH: B256 =
    b256!("d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3");

/// Hash of the goerli genesis block.
pub const GOERLI_GENESIS_HASH: B256 =
    b256!("bf7e331f7f7c1dd2e05159666b3bf8bc7a8a3a9eb1d518969eab529dd9b88c1a");

/// Hash of the rinkeby genesis block.
pub const RINKEBY_GENESIS_HASH: B256 =
    b256!("6341fd3daf94b748c72ced5a5b26028f2474f5f00d824504e4fa37a75767e177");

/// Hash of the sepolia genesis block.
pub const SEPOLIA_GENESIS_HASH: B256 =
    b256!("25a5cc106eea7138acab33231d7160d69cb777ee0c2c553fcddf5138993e6dd9");

lazy_static::lazy_static! {
    /// Ethereum mainnet.
    pub static ref MAINNET_CONFIG: ChainConfig = ChainConfig {
        chain_id: 1,
        seal_engine: SealEngineType::Ethash,
        homestead_block: Some(1_150_000),
        dao_block: Some(1_920_000),
        tangerine_whistle_block: Some(2_463_000),
        spurious_dragon_block: Some(2_675_000),
        byzantium_block: Some(4_370_000),
        constantinople_block: Some(7_280_000),
        petersburg_block: Some(7_280_000),
        istanbul_block: Some(9_069_000),
        muir_glacier_block: Some(9_200_000),
        berlin_block: Some(12_244_000),
        london_block: Some(12_965_000),
        arrow_glacier_block: Some(13_773_000),
        gray_glacier_block: Some(15_050_000),
        terminal_total_difficulty: Some(uint!(58750000000000000000000_U256)),
        ..Default::default()
    };

    /// The goerli proof-of-authority testnet.
    pub static ref GOERLI_CONFIG: ChainConfig = ChainConfig {
        chain_id: 5,
        seal_engine: SealEngineType::Clique,
        homestead_block: Some(0),
        tangerine_whistle_block: Some(0),
        spurious_dragon_block: Some(0),
        byzantium_block: Some(0),
        constantinople_block: Some(0),
        petersburg_block: Some(0),
        istanbul_block: Some(1_561_651),
        berlin_block: Some(4_460_644),
        london_block: Some(5_062_605),
        terminal_total_difficulty: Some(uint!(10790000_U256)),
        ..Default::default()
    };

    /// The rinkeby proof-of-authority testnet.
    pub static ref RINKEBY_CONFIG: ChainConfig = ChainConfig {
        chain_id: 4,
        seal_engine: SealEngineType::Clique,
        homestead_block: Some(1),
        tangerine_whistle_block: Some(2),
        spurious_dragon_block: Some(3),
        byzantium_block: Some(1_035_301),
        constantinople_block: Some(3_660_663),
        petersburg_block: Some(4_321_234),
        istanbul_block: Some(5_435_345),
        berlin_block: Some(8_290_928),
        london_block: Some(8_897_988),
        ..Default::default()
    };

    /// The sepolia proof-of-work-launched testnet.
    pub static ref SEPOLIA_CONFIG: ChainConfig = ChainConfig {
        chain_id: 11_155_111,
        seal_engine: SealEngineType::Ethash,
        homestead_block: Some(0),
        tangerine_whistle_block: Some(0),
        spurious_dragon_block: Some(0),
        byzantium_block: Some(0),
        constantinople_block: Some(0),
        petersburg_block: Some(0),
        istanbul_block: Some(0),
        muir_glacier_block: Some(0),
        berlin_block: Some(0),
        london_block: Some(0),
        terminal_total_difficulty: Some(uint!(17000000000000000_U256)),
        merge_netsplit_block: Some(1_735_371),
        ..Default::default()
    };

    static ref KNOWN_CHAINS: Vec<(&'static str, &'static ChainConfig)> = vec![
        ("mainnet", &*MAINNET_CONFIG),
        ("goerli", &*GOERLI_CONFIG),
        ("rinkeby", &*RINKEBY_CONFIG),
        ("sepolia", &*SEPOLIA_CONFIG),
    ];
}

/// Looks up a known chain by its chain id.
pub fn known_chain_by_id(chain_id: u64) -> Option<(&'static str, &'static ChainConfig)> {
    KNOWN_CHAINS.iter().copied().find(|(_, config)| config.chain_id == chain_id)
}

/// Looks up a known chain by its identifier, e.g. `"mainnet"`.
pub fn known_chain_by_name(name: &str) -> Option<(&'static str, &'static ChainConfig)> {
    let name = name.to_ascii_lowercase();
    KNOWN_CHAINS.iter().copied().find(|(ident, _)| *ident == name)
}

/// All known chain identifiers mapped to their chain ids.
pub fn known_chains() -> BTreeMap<&'static str, u64> {
    KNOWN_CHAINS.iter().map(|(ident, config)| (*ident, config.chain_id)).collect()
}
