//! Genesis block construction for known and custom chains.

use crate::{ChainConfig, Revision, GOERLI_CONFIG, MAINNET_CONFIG, RINKEBY_CONFIG, SEPOLIA_CONFIG};
use alloy_primitives::{b256, hex, keccak256, Address, Bytes, B256, B64, U256};
use alloy_trie::{
    root::{state_root_unhashed, storage_root_unhashed},
    TrieAccount, EMPTY_ROOT_HASH, KECCAK_EMPTY,
};
use corten_primitives::{BlockHeader, EMPTY_LIST_HASH, EMPTY_ROOT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// EIP-1559 initial base fee, applied when London is active at genesis.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

/// One genesis allocation entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Initial balance in wei.
    pub balance: U256,
    /// Initial nonce.
    #[serde(default)]
    pub nonce: u64,
    /// Deployed code, if any.
    #[serde(default)]
    pub code: Bytes,
    /// Initial storage, if any.
    #[serde(default)]
    pub storage: BTreeMap<B256, U256>,
}

/// Everything needed to materialize block zero of a chain.
///
/// Known networks pin their post-allocation state root (the full mainnet
/// allocation is an input artifact, not embedded); custom chains provide an
/// allocation and the root is computed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisSpec {
    /// Chain parameters.
    pub config: ChainConfig,
    /// Genesis seal nonce.
    pub nonce: B64,
    /// Genesis timestamp.
    pub timestamp: u64,
    /// Genesis extra data.
    pub extra_data: Bytes,
    /// Genesis gas limit.
    pub gas_limit: u64,
    /// Genesis difficulty.
    pub difficulty: U256,
    /// Genesis mix hash.
    pub mix_hash: B256,
    /// Genesis beneficiary.
    pub beneficiary: Address,
    /// Pinned state root, when the allocation is not carried inline.
    pub state_root: Option<B256>,
    /// Initial account allocation.
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

impl GenesisSpec {
    /// Root of the state trie over the inline allocation.
    pub fn alloc_state_root(&self) -> B256 {
        if self.alloc.is_empty() {
            return EMPTY_ROOT;
        }
        state_root_unhashed(self.alloc.iter().map(|(address, account)| {
            let storage_root = if account.storage.is_empty() {
                EMPTY_ROOT_HASH
            } else {
                storage_root_unhashed(
                    account
                        .storage
                        .iter()
                        .filter(|(_, value)| !value.is_zero())
                        .map(|(slot, value)| (*slot, *value)),
                )
            };
            let code_hash =
                if account.code.is_empty() { KECCAK_EMPTY } else { keccak256(&account.code) };
            (
                *address,
                TrieAccount {
                    nonce: account.nonce,
                    balance: account.balance,
                    storage_root,
                    code_hash,
                },
            )
        }))
    }

    /// Builds the genesis block header.
    pub fn header(&self) -> BlockHeader {
        let base_fee_per_gas = (self.config.revision(0, self.timestamp) >= Revision::London)
            .then(|| U256::from(INITIAL_BASE_FEE));
        let withdrawals_root = (self.config.revision(0, self.timestamp) >= Revision::Shanghai)
            .then_some(EMPTY_ROOT);
        BlockHeader {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_LIST_HASH,
            beneficiary: self.beneficiary,
            state_root: self.state_root.unwrap_or_else(|| self.alloc_state_root()),
            transactions_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            difficulty: self.difficulty,
            gas_limit: self.gas_limit,
            timestamp: self.timestamp,
            extra_data: self.extra_data.clone(),
            mix_hash: self.mix_hash,
            nonce: self.nonce,
            base_fee_per_gas,
            withdrawals_root,
            ..Default::default()
        }
    }
}

fn plain_spec(config: &ChainConfig) -> GenesisSpec {
    GenesisSpec {
        config: config.clone(),
        nonce: B64::ZERO,
        timestamp: 0,
        extra_data: Bytes::new(),
        gas_limit: 0,
        difficulty: U256::ZERO,
        mix_hash: B256::ZERO,
        beneficiary: Address::ZERO,
        state_root: None,
        alloc: BTreeMap::new(),
    }
}

/// The genesis spec of a known chain, by chain id.
pub fn genesis_spec_for_chain(chain_id: u64) -> Option<GenesisSpec> {
    match chain_id {
        1 => Some(GenesisSpec {
            nonce: B64::from(hex!("0000000000000042")),
            extra_data: hex!("11bbe8db4e347b4e8c937c1c8370e4b5ed33adb3db69cbdb7a38e1e50b1b82fa")
                .to_vec().into(),
            gas_limit: 5_000,
            difficulty: U256::from(0x400000000u64),
            state_root: Some(b256!(
                "d7f8974fb5ac78d9ac099b9ad5018bedc2ce0a72dad1827a1709da30580f0544"
            )),
            ..plain_spec(&MAINNET_CONFIG)
        }),
        5 => Some(GenesisSpec {
            timestamp: 1_548_854_791,
            extra_data: hex!("22466c6578692069732061207468696e6722202d204166726900000000000000e0a2bd4258d2768837baa26a28fe71dc079f84c70000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000")
                .to_vec()
                .into(),
            gas_limit: 10_485_760,
            difficulty: U256::from(1u64),
            state_root: Some(b256!(
                "5d6cded585e73c4e322c30c2f782a336316f17dd85a4863b9d838d2d4b8b3008"
            )),
            ..plain_spec(&GOERLI_CONFIG)
        }),
        4 => Some(GenesisSpec {
            timestamp: 1_492_009_146,
            extra_data: hex!("52657370656374206d7920617574686f7269746168207e452e436172746d616e42eb768f2244c8811c63729a21a3569731535f060000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000")
                .to_vec()
                .into(),
            gas_limit: 4_700_000,
            difficulty: U256::from(1u64),
            state_root: Some(b256!(
                "53580584816f617295ea26c0e17641e0120cab2f0a8ffb53a866fd53aa8e8c2d"
            )),
            ..plain_spec(&RINKEBY_CONFIG)
        }),
        11_155_111 => Some(GenesisSpec {
            timestamp: 1_633_267_481,
            extra_data: hex!("5365706f6c69612c20417468656e732c204174746963612c2047726565636521")
                .to_vec().into(),
            gas_limit: 30_000_000,
            difficulty: U256::from(0x20000u64),
            state_root: Some(b256!(
                "5eb6e371a698b8d68f665192350ffcecbbbf322916f4b51bd79bb6887da3f494"
            )),
            ..plain_spec(&SEPOLIA_CONFIG)
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        GOERLI_GENESIS_HASH, MAINNET_GENESIS_HASH, RINKEBY_GENESIS_HASH, SEPOLIA_GENESIS_HASH,
    };
    use rstest::rstest;

    #[rstest]
    #[case::mainnet(1, MAINNET_GENESIS_HASH)]
    #[case::goerli(5, GOERLI_GENESIS_HASH)]
    #[case::rinkeby(4, RINKEBY_GENESIS_HASH)]
    #[case::sepolia(11_155_111, SEPOLIA_GENESIS_HASH)]
    fn known_genesis_hashes(#[case] chain_id: u64, #[case] expected: B256) {
        let spec = genesis_spec_for_chain(chain_id).unwrap();
        assert_eq!(spec.header().hash(), expected);
        assert_eq!(spec.header().number, 0);
    }

    #[test]
    fn sepolia_genesis_has_initial_base_fee() {
        let spec = genesis_spec_for_chain(11_155_111).unwrap();
        assert_eq!(spec.header().base_fee_per_gas, Some(U256::from(INITIAL_BASE_FEE)));
        // mainnet activated London long after genesis
        let spec = genesis_spec_for_chain(1).unwrap();
        assert_eq!(spec.header().base_fee_per_gas, None);
    }

    #[test]
    fn alloc_root_of_single_balance() {
        let mut spec = plain_spec(&MAINNET_CONFIG);
        spec.alloc.insert(
            Address::repeat_byte(0x01),
            GenesisAccount { balance: U256::from(1_000_000u64), ..Default::default() },
        );
        let root = spec.alloc_state_root();
        assert_ne!(root, EMPTY_ROOT);
        // deterministic
        assert_eq!(root, spec.alloc_state_root());
    }

    #[test]
    fn empty_alloc_root_is_empty_trie_root() {
        assert_eq!(plain_spec(&MAINNET_CONFIG).alloc_state_root(), EMPTY_ROOT);
    }
}
