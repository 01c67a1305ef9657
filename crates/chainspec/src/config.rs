//! Chain configuration and its geth-compatible JSON form.

use crate::Revision;
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// The seal engine named by a chain configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SealEngineType {
    /// No seal verification (dev chains).
    #[default]
    NoProof,
    /// Proof of work.
    Ethash,
    /// Proof of authority (EIP-225).
    Clique,
    /// Authority Round; recognized but not executable here.
    AuRa,
}

/// Consensus-relevant parameters of one chain.
///
/// Forks through Gray Glacier activate by block number, the merge by
/// terminal total difficulty (with `merge_netsplit_block` as the FORK_NEXT
/// value of EIP-3675), and Shanghai onwards by block timestamp. A fork is
/// active at `(number, time)` iff its threshold is `<=` the corresponding
/// field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EIP-155 chain identifier.
    pub chain_id: u64,
    /// Hash of the genesis block, once known.
    pub genesis_hash: Option<B256>,
    /// Seal engine of the pre-merge chain.
    pub seal_engine: SealEngineType,
    /// Homestead activation block.
    pub homestead_block: Option<u64>,
    /// DAO irregular state-change block.
    pub dao_block: Option<u64>,
    /// EIP-150 activation block.
    pub tangerine_whistle_block: Option<u64>,
    /// EIP-155 activation block.
    pub spurious_dragon_block: Option<u64>,
    /// Byzantium activation block.
    pub byzantium_block: Option<u64>,
    /// Constantinople activation block.
    pub constantinople_block: Option<u64>,
    /// Petersburg activation block.
    pub petersburg_block: Option<u64>,
    /// Istanbul activation block.
    pub istanbul_block: Option<u64>,
    /// Muir Glacier bomb delay block.
    pub muir_glacier_block: Option<u64>,
    /// Berlin activation block.
    pub berlin_block: Option<u64>,
    /// London activation block.
    pub london_block: Option<u64>,
    /// Arrow Glacier bomb delay block.
    pub arrow_glacier_block: Option<u64>,
    /// Gray Glacier bomb delay block.
    pub gray_glacier_block: Option<u64>,
    /// Terminal total difficulty of the proof-of-work chain.
    pub terminal_total_difficulty: Option<U256>,
    /// FORK_NEXT_VALUE of EIP-3675.
    pub merge_netsplit_block: Option<u64>,
    /// Shanghai activation timestamp.
    pub shanghai_time: Option<u64>,
    /// Cancun activation timestamp.
    pub cancun_time: Option<u64>,
}

fn active(threshold: Option<u64>, at: u64) -> bool {
    threshold.is_some_and(|t| t <= at)
}

impl ChainConfig {
    /// The protocol revision at `(block_number, block_time)`.
    ///
    /// The terminal-total-difficulty crossing is a chain-state fact this
    /// pure function cannot observe; `merge_netsplit_block` stands in for
    /// it by number, and execution upgrades any zero-difficulty block to at
    /// least [`Revision::Paris`].
    pub fn revision(&self, block_number: u64, block_time: u64) -> Revision {
        if active(self.cancun_time, block_time) {
            return Revision::Cancun;
        }
        if active(self.shanghai_time, block_time) {
            return Revision::Shanghai;
        }
        if active(self.merge_netsplit_block, block_number) {
            return Revision::Paris;
        }
        if active(self.london_block, block_number) {
            return Revision::London;
        }
        if active(self.berlin_block, block_number) {
            return Revision::Berlin;
        }
        if active(self.istanbul_block, block_number) {
            return Revision::Istanbul;
        }
        if active(self.petersburg_block, block_number) {
            return Revision::Petersburg;
        }
        if active(self.constantinople_block, block_number) {
            return Revision::Constantinople;
        }
        if active(self.byzantium_block, block_number) {
            return Revision::Byzantium;
        }
        if active(self.spurious_dragon_block, block_number) {
            return Revision::SpuriousDragon;
        }
        if active(self.tangerine_whistle_block, block_number) {
            return Revision::TangerineWhistle;
        }
        if active(self.homestead_block, block_number) {
            return Revision::Homestead;
        }
        Revision::Frontier
    }

    /// The distinct block numbers at which some fork activates, ascending.
    pub fn distinct_fork_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = [
            self.homestead_block,
            self.dao_block,
            self.tangerine_whistle_block,
            self.spurious_dragon_block,
            self.byzantium_block,
            self.constantinople_block,
            self.petersburg_block,
            self.istanbul_block,
            self.muir_glacier_block,
            self.berlin_block,
            self.london_block,
            self.arrow_glacier_block,
            self.gray_glacier_block,
            self.merge_netsplit_block,
        ]
        .into_iter()
        .flatten()
        .filter(|n| *n != 0)
        .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// The distinct timestamps at which some fork activates, ascending.
    pub fn distinct_fork_times(&self) -> Vec<u64> {
        let mut times: Vec<u64> =
            [self.shanghai_time, self.cancun_time].into_iter().flatten().collect();
        times.sort_unstable();
        times.dedup();
        times
    }

    /// Parses a geth-style chain-config JSON document. Returns `None` when
    /// `chainId` is missing or not an integer.
    pub fn from_json(json: &Value) -> Option<Self> {
        let object = json.as_object()?;
        let chain_id = object.get("chainId")?.as_u64()?;

        let block = |name: &str| object.get(name).and_then(Value::as_u64);

        let seal_engine = if object.contains_key("ethash") {
            SealEngineType::Ethash
        } else if object.contains_key("clique") {
            SealEngineType::Clique
        } else if object.contains_key("aura") {
            SealEngineType::AuRa
        } else {
            SealEngineType::NoProof
        };

        let terminal_total_difficulty = match object.get("terminalTotalDifficulty") {
            None | Some(Value::Null) => None,
            Some(Value::Number(number)) => {
                Some(U256::from_str_radix(&number.to_string(), 10).ok()?)
            }
            Some(Value::String(s)) => {
                let parsed = if let Some(hex) = s.strip_prefix("0x") {
                    U256::from_str_radix(hex, 16)
                } else {
                    U256::from_str_radix(s, 10)
                };
                Some(parsed.ok()?)
            }
            Some(_) => return None,
        };

        Some(Self {
            chain_id,
            genesis_hash: None,
            seal_engine,
            homestead_block: block("homesteadBlock"),
            dao_block: block("daoForkBlock"),
            tangerine_whistle_block: block("eip150Block"),
            spurious_dragon_block: block("eip155Block"),
            byzantium_block: block("byzantiumBlock"),
            constantinople_block: block("constantinopleBlock"),
            petersburg_block: block("petersburgBlock"),
            istanbul_block: block("istanbulBlock"),
            muir_glacier_block: block("muirGlacierBlock"),
            berlin_block: block("berlinBlock"),
            london_block: block("londonBlock"),
            arrow_glacier_block: block("arrowGlacierBlock"),
            gray_glacier_block: block("grayGlacierBlock"),
            terminal_total_difficulty,
            merge_netsplit_block: block("mergeNetsplitBlock"),
            shanghai_time: block("shanghaiTime"),
            cancun_time: block("cancunTime"),
        })
    }

    /// The geth-style JSON form of this configuration.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("chainId".into(), json!(self.chain_id));

        let mut block = |name: &str, value: Option<u64>| {
            if let Some(value) = value {
                object.insert(name.into(), json!(value));
            }
        };
        block("homesteadBlock", self.homestead_block);
        block("daoForkBlock", self.dao_block);
        block("eip150Block", self.tangerine_whistle_block);
        block("eip155Block", self.spurious_dragon_block);
        block("byzantiumBlock", self.byzantium_block);
        block("constantinopleBlock", self.constantinople_block);
        block("petersburgBlock", self.petersburg_block);
        block("istanbulBlock", self.istanbul_block);
        block("muirGlacierBlock", self.muir_glacier_block);
        block("berlinBlock", self.berlin_block);
        block("londonBlock", self.london_block);
        block("arrowGlacierBlock", self.arrow_glacier_block);
        block("grayGlacierBlock", self.gray_glacier_block);
        block("mergeNetsplitBlock", self.merge_netsplit_block);
        block("shanghaiTime", self.shanghai_time);
        block("cancunTime", self.cancun_time);

        if let Some(ttd) = self.terminal_total_difficulty {
            let number = serde_json::Number::from_string_unchecked(ttd.to_string());
            object.insert("terminalTotalDifficulty".into(), Value::Number(number));
        }
        match self.seal_engine {
            SealEngineType::Ethash => {
                object.insert("ethash".into(), json!({}));
            }
            SealEngineType::Clique => {
                object.insert("clique".into(), json!({}));
            }
            SealEngineType::AuRa => {
                object.insert("aura".into(), json!({}));
            }
            SealEngineType::NoProof => {}
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAINNET_CONFIG;
    use rstest::rstest;

    #[rstest]
    #[case(0, Revision::Frontier)]
    #[case(1_149_999, Revision::Frontier)]
    #[case(1_150_000, Revision::Homestead)]
    #[case(2_675_000, Revision::SpuriousDragon)]
    #[case(4_370_000, Revision::Byzantium)]
    #[case(9_068_999, Revision::Petersburg)]
    #[case(9_069_000, Revision::Istanbul)]
    #[case(12_243_999, Revision::Istanbul)]
    #[case(12_244_000, Revision::Berlin)]
    #[case(12_964_999, Revision::Berlin)]
    #[case(12_965_000, Revision::London)]
    #[case(20_000_000, Revision::London)]
    fn mainnet_revision_boundaries(#[case] number: u64, #[case] expected: Revision) {
        // mainnet carries no timestamp forks, so time must not matter
        for time in [0, 1_600_000_000, u64::MAX] {
            assert_eq!(MAINNET_CONFIG.revision(number, time), expected);
        }
    }

    #[test]
    fn revision_is_monotonic() {
        let config = crate::SEPOLIA_CONFIG.clone();
        let mut last = Revision::Frontier;
        for number in [0u64, 1, 1_735_370, 1_735_371, 10_000_000] {
            let revision = config.revision(number, 0);
            assert!(revision >= last);
            last = revision;
        }
    }

    #[test]
    fn time_forks_take_precedence() {
        let config = ChainConfig {
            london_block: Some(0),
            merge_netsplit_block: Some(0),
            shanghai_time: Some(1_681_338_455),
            cancun_time: Some(1_710_338_135),
            ..Default::default()
        };
        assert_eq!(config.revision(100, 0), Revision::Paris);
        assert_eq!(config.revision(100, 1_681_338_455), Revision::Shanghai);
        assert_eq!(config.revision(100, 1_710_338_135), Revision::Cancun);
    }

    #[test]
    fn json_roundtrip() {
        for config in [
            &*MAINNET_CONFIG,
            &*crate::GOERLI_CONFIG,
            &*crate::SEPOLIA_CONFIG,
            &*crate::RINKEBY_CONFIG,
        ] {
            let encoded = config.to_json();
            let decoded = ChainConfig::from_json(&encoded).unwrap();
            assert_eq!(&decoded, config);
        }
    }

    #[test]
    fn missing_chain_id_yields_none() {
        assert!(ChainConfig::from_json(&json!({"homesteadBlock": 0})).is_none());
        assert!(ChainConfig::from_json(&json!({"chainId": "1"})).is_none());
        assert!(ChainConfig::from_json(&json!([1, 2, 3])).is_none());
    }

    #[test]
    fn sample_mainnet_document_parses() {
        let document = json!({
            "chainId": 1,
            "homesteadBlock": 1_150_000u64,
            "daoForkBlock": 1_920_000u64,
            "eip150Block": 2_463_000u64,
            "eip155Block": 2_675_000u64,
            "byzantiumBlock": 4_370_000u64,
            "constantinopleBlock": 7_280_000u64,
            "petersburgBlock": 7_280_000u64,
            "istanbulBlock": 9_069_000u64,
            "muirGlacierBlock": 9_200_000u64,
            "berlinBlock": 12_244_000u64,
            "ethash": {},
        });
        let config = ChainConfig::from_json(&document).unwrap();
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.seal_engine, SealEngineType::Ethash);
        assert_eq!(config.berlin_block, Some(12_244_000));
        assert_eq!(config.london_block, None);
    }

    #[test]
    fn big_terminal_total_difficulty_survives_json() {
        let encoded = MAINNET_CONFIG.to_json();
        let decoded = ChainConfig::from_json(&encoded).unwrap();
        assert_eq!(
            decoded.terminal_total_difficulty,
            Some(U256::from_str_radix("58750000000000000000000", 10).unwrap())
        );
    }
}
