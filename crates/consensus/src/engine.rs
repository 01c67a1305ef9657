//! The closed set of consensus engines and the merge composite.

use crate::{
    BlockState, EngineBase, RewardState, SealVariant, ValidationError, ValidationResult,
};
use alloy_primitives::{Address, U256};
use corten_chainspec::{ChainConfig, Revision, SealEngineType};
use corten_primitives::{Block, BlockHeader};

/// A consensus engine: one of the pre-merge variants, or the merge
/// composite dispatching between a pre-merge engine and proof of stake by
/// header difficulty.
#[derive(Debug, Clone)]
pub enum ConsensusEngine {
    /// A single engine for the whole chain.
    Single(EngineBase),
    /// The merge composite.
    Merge(MergeEngine),
}

/// The merge composite: proof-of-work until terminal total difficulty,
/// proof of stake afterwards.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    terminal_total_difficulty: U256,
    pre: EngineBase,
    post: EngineBase,
}

/// Builds the engine a chain configuration names.
pub fn engine_factory(config: &ChainConfig) -> Result<ConsensusEngine, ValidationError> {
    let variant = match config.seal_engine {
        SealEngineType::NoProof => SealVariant::NoProof,
        SealEngineType::Ethash => SealVariant::Ethash,
        SealEngineType::Clique => SealVariant::Clique,
        SealEngineType::AuRa => return Err(ValidationError::UnknownConsensusEngine),
    };
    let pre = EngineBase::new(config.clone(), variant);
    match config.terminal_total_difficulty {
        Some(terminal_total_difficulty) => Ok(ConsensusEngine::Merge(MergeEngine {
            terminal_total_difficulty,
            pre,
            post: EngineBase::new(config.clone(), SealVariant::ProofOfStake),
        })),
        None => Ok(ConsensusEngine::Single(pre)),
    }
}

impl MergeEngine {
    /// Whether `header` is the terminal proof-of-work block: the first
    /// whose own inclusion carries total difficulty past the terminal
    /// value.
    fn terminal_pow_block(
        &self,
        header: &BlockHeader,
        state: &dyn BlockState,
    ) -> Result<bool, ValidationError> {
        if header.difficulty.is_zero() {
            return Ok(false);
        }
        let Some(parent) = state.parent_header(header)? else {
            return Ok(false);
        };
        let Some(parent_total_difficulty) =
            state.total_difficulty(parent.number, header.parent_hash)?
        else {
            return Ok(false);
        };
        Ok(parent_total_difficulty < self.terminal_total_difficulty
            && parent_total_difficulty + header.difficulty >= self.terminal_total_difficulty)
    }

    fn validate_block_header(
        &self,
        header: &BlockHeader,
        state: &dyn BlockState,
        with_future_timestamp_check: bool,
    ) -> ValidationResult {
        let Some(parent) = state.parent_header(header)? else {
            return Err(ValidationError::UnknownParent);
        };

        if !header.difficulty.is_zero() {
            let Some(parent_total_difficulty) =
                state.total_difficulty(parent.number, header.parent_hash)?
            else {
                return Err(ValidationError::UnknownParentTotalDifficulty);
            };
            if parent_total_difficulty >= self.terminal_total_difficulty {
                return Err(ValidationError::PoWBlockAfterMerge);
            }
            return self.pre.validate_block_header(header, state, with_future_timestamp_check);
        }

        if !parent.difficulty.is_zero() && !self.terminal_pow_block(&parent, state)? {
            return Err(ValidationError::PoSBlockBeforeMerge);
        }
        self.post.validate_block_header(header, state, with_future_timestamp_check)
    }
}

impl ConsensusEngine {
    /// Validates the intrinsic consistency of a block body.
    pub fn pre_validate_block_body(
        &self,
        block: &Block,
        state: &dyn BlockState,
    ) -> ValidationResult {
        match self {
            Self::Single(engine) => engine.pre_validate_block_body(block, state),
            Self::Merge(merge) => {
                if block.header.difficulty.is_zero() {
                    merge.post.pre_validate_block_body(block, state)
                } else {
                    merge.pre.pre_validate_block_body(block, state)
                }
            }
        }
    }

    /// Validates a header against its parent.
    pub fn validate_block_header(
        &self,
        header: &BlockHeader,
        state: &dyn BlockState,
        with_future_timestamp_check: bool,
    ) -> ValidationResult {
        match self {
            Self::Single(engine) => {
                engine.validate_block_header(header, state, with_future_timestamp_check)
            }
            Self::Merge(merge) => {
                merge.validate_block_header(header, state, with_future_timestamp_check)
            }
        }
    }

    /// Validates the seal fields.
    pub fn validate_seal(&self, header: &BlockHeader) -> ValidationResult {
        match self {
            Self::Single(engine) => engine.validate_seal(header),
            Self::Merge(merge) => {
                if header.difficulty.is_zero() {
                    merge.post.validate_seal(header)
                } else {
                    merge.pre.validate_seal(header)
                }
            }
        }
    }

    /// Validates the ommers of a block.
    pub fn validate_ommers(&self, block: &Block, state: &dyn BlockState) -> ValidationResult {
        match self {
            Self::Single(engine) => engine.validate_ommers(block, state),
            Self::Merge(merge) => {
                if block.header.difficulty.is_zero() {
                    merge.post.validate_ommers(block, state)
                } else {
                    merge.pre.validate_ommers(block, state)
                }
            }
        }
    }

    /// Validates every transaction of a block.
    pub fn pre_validate_transactions(&self, block: &Block) -> ValidationResult {
        match self {
            Self::Single(engine) => engine.pre_validate_transactions(block),
            Self::Merge(merge) => {
                if block.header.difficulty.is_zero() {
                    merge.post.pre_validate_transactions(block)
                } else {
                    merge.pre.pre_validate_transactions(block)
                }
            }
        }
    }

    /// Applies block-level finalization: rewards or withdrawals.
    pub fn finalize(&self, state: &mut dyn RewardState, block: &Block, revision: Revision) {
        match self {
            Self::Single(engine) => engine.finalize(state, block, revision),
            Self::Merge(merge) => {
                if block.header.difficulty.is_zero() {
                    merge.post.finalize(state, block, revision)
                } else {
                    merge.pre.finalize(state, block, revision)
                }
            }
        }
    }

    /// The address receiving block rewards and fees.
    pub fn get_beneficiary(&self, header: &BlockHeader) -> Address {
        match self {
            Self::Single(engine) => engine.get_beneficiary(header),
            Self::Merge(merge) => {
                if header.difficulty.is_zero() {
                    merge.post.get_beneficiary(header)
                } else {
                    merge.pre.get_beneficiary(header)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256};
    use corten_chainspec::MAINNET_CONFIG;
    use corten_primitives::Withdrawal;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapState {
        headers: HashMap<(u64, B256), BlockHeader>,
        difficulties: HashMap<(u64, B256), U256>,
    }

    impl MapState {
        fn insert(&mut self, header: BlockHeader, total_difficulty: U256) -> B256 {
            let hash = header.hash();
            self.difficulties.insert((header.number, hash), total_difficulty);
            self.headers.insert((header.number, hash), header);
            hash
        }
    }

    impl BlockState for MapState {
        fn header(
            &self,
            number: u64,
            hash: B256,
        ) -> Result<Option<BlockHeader>, ValidationError> {
            Ok(self.headers.get(&(number, hash)).cloned())
        }

        fn total_difficulty(
            &self,
            number: u64,
            hash: B256,
        ) -> Result<Option<U256>, ValidationError> {
            Ok(self.difficulties.get(&(number, hash)).copied())
        }
    }

    fn merge_engine(terminal: u64) -> ConsensusEngine {
        let config = ChainConfig {
            terminal_total_difficulty: Some(U256::from(terminal)),
            ..ChainConfig { seal_engine: SealEngineType::NoProof, ..MAINNET_CONFIG.clone() }
        };
        engine_factory(&config).unwrap()
    }

    fn child_of(parent: &BlockHeader, parent_hash: B256, difficulty: u64) -> BlockHeader {
        BlockHeader {
            number: parent.number + 1,
            parent_hash,
            timestamp: parent.timestamp + 12,
            gas_limit: parent.gas_limit,
            difficulty: U256::from(difficulty),
            base_fee_per_gas: parent.base_fee_per_gas,
            ..Default::default()
        }
    }

    #[test]
    fn pow_block_after_merge_is_rejected() {
        let engine = merge_engine(1_000);
        let mut state = MapState::default();
        let parent = BlockHeader {
            number: 10,
            difficulty: U256::from(100u64),
            timestamp: 1_000,
            gas_limit: 30_000_000,
            ..Default::default()
        };
        let parent_hash = state.insert(parent.clone(), U256::from(1_500u64));

        let pow_child = child_of(&parent, parent_hash, 100);
        assert_eq!(
            engine.validate_block_header(&pow_child, &state, false),
            Err(ValidationError::PoWBlockAfterMerge)
        );
    }

    #[test]
    fn pos_block_before_merge_is_rejected() {
        let engine = merge_engine(1_000_000);
        let mut state = MapState::default();

        let grandparent = BlockHeader {
            number: 9,
            difficulty: U256::from(100u64),
            timestamp: 988,
            gas_limit: 30_000_000,
            ..Default::default()
        };
        let grandparent_hash = state.insert(grandparent.clone(), U256::from(400u64));

        // parent is a non-terminal PoW block (total difficulty well below)
        let parent = child_of(&grandparent, grandparent_hash, 100);
        let parent_hash = state.insert(parent.clone(), U256::from(500u64));

        let pos_child = child_of(&parent, parent_hash, 0);
        assert_eq!(
            engine.validate_block_header(&pos_child, &state, false),
            Err(ValidationError::PoSBlockBeforeMerge)
        );
    }

    #[test]
    fn pos_block_after_terminal_pow_block_is_accepted() {
        let engine = merge_engine(1_000);
        let mut state = MapState::default();

        let grandparent = BlockHeader {
            number: 9,
            difficulty: U256::from(100u64),
            timestamp: 988,
            gas_limit: 30_000_000,
            ..Default::default()
        };
        let grandparent_hash = state.insert(grandparent.clone(), U256::from(950u64));

        // parent crosses the terminal total difficulty: 950 + 100 >= 1000
        let parent = child_of(&grandparent, grandparent_hash, 100);
        let parent_hash = state.insert(parent.clone(), U256::from(1_050u64));

        let pos_child = child_of(&parent, parent_hash, 0);
        assert_eq!(engine.validate_block_header(&pos_child, &state, false), Ok(()));
    }

    #[test]
    fn missing_parent_total_difficulty_is_reported() {
        let engine = merge_engine(1_000);
        let mut state = MapState::default();
        let parent = BlockHeader {
            number: 5,
            difficulty: U256::from(10u64),
            timestamp: 100,
            gas_limit: 30_000_000,
            ..Default::default()
        };
        let hash = parent.hash();
        state.headers.insert((5, hash), parent.clone());

        let pow_child = child_of(&parent, hash, 10);
        assert_eq!(
            engine.validate_block_header(&pow_child, &state, false),
            Err(ValidationError::UnknownParentTotalDifficulty)
        );
    }

    #[test]
    fn aura_is_not_runnable() {
        let config = ChainConfig { seal_engine: SealEngineType::AuRa, ..Default::default() };
        assert!(matches!(
            engine_factory(&config),
            Err(ValidationError::UnknownConsensusEngine)
        ));
    }

    #[test]
    fn pre_merge_rewards_and_post_merge_withdrawals() {
        #[derive(Default)]
        struct Ledger {
            credits: Vec<(Address, U256)>,
        }
        impl RewardState for Ledger {
            fn add_balance(&mut self, address: Address, amount: U256) {
                self.credits.push((address, amount));
            }
            fn touch(&mut self, _address: Address) {}
        }

        let config = ChainConfig { seal_engine: SealEngineType::Ethash, ..Default::default() };
        let engine = engine_factory(&config).unwrap();
        let miner = Address::repeat_byte(0xaa);
        let block = Block {
            header: BlockHeader { number: 1, beneficiary: miner, ..Default::default() },
            ..Default::default()
        };

        let mut ledger = Ledger::default();
        engine.finalize(&mut ledger, &block, Revision::Constantinople);
        assert_eq!(
            ledger.credits,
            vec![(miner, U256::from(2u64) * U256::from(1_000_000_000_000_000_000u64))]
        );

        // proof of stake processes withdrawals instead
        let engine = merge_engine(1);
        let recipient = Address::repeat_byte(0xbb);
        let block = Block {
            header: BlockHeader { number: 2, ..Default::default() },
            body: corten_primitives::BlockBody {
                withdrawals: Some(vec![Withdrawal {
                    index: 0,
                    validator_index: 0,
                    address: recipient,
                    amount: 3,
                }]),
                ..Default::default()
            },
        };
        let mut ledger = Ledger::default();
        engine.finalize(&mut ledger, &block, Revision::Shanghai);
        assert_eq!(ledger.credits, vec![(recipient, U256::from(3_000_000_000u64))]);
    }
}
