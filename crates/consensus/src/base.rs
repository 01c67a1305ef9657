//! Shared engine machinery: header, body and ommer validation plus block
//! finalization for the pre-merge and post-merge variants alike.

use crate::{
    canonical_difficulty, expected_base_fee_per_gas, pre_validate_transaction, BlockState,
    RewardState, ValidationError, ValidationResult, MIN_GAS_LIMIT,
};
use alloy_primitives::{keccak256, Address, U256};
use alloy_rlp::Encodable;
use alloy_trie::root::ordered_trie_root_with_encoder;
use corten_chainspec::{ChainConfig, Revision};
use corten_primitives::{Block, BlockHeader, Transaction, Withdrawal, EMPTY_LIST_HASH};
use std::time::{SystemTime, UNIX_EPOCH};

/// Permitted clock drift for the future-timestamp check.
const MAX_FUTURE_BLOCK_TIME: u64 = 15;
/// Extra-data cap for non-authority chains.
const MAX_EXTRA_DATA_BYTES: usize = 32;
/// Generations an ommer may lag its nephew.
const MAX_OMMER_DEPTH: u64 = 6;

const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

/// The seal flavor an [`EngineBase`] enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealVariant {
    /// No seal verification.
    NoProof,
    /// Proof of work.
    Ethash,
    /// Proof of authority.
    Clique,
    /// Proof of stake.
    ProofOfStake,
}

/// One concrete engine: chain parameters plus a seal flavor.
#[derive(Debug, Clone)]
pub struct EngineBase {
    config: ChainConfig,
    variant: SealVariant,
    prohibit_ommers: bool,
}

impl EngineBase {
    /// Creates an engine for `variant` over `config`.
    pub fn new(config: ChainConfig, variant: SealVariant) -> Self {
        let prohibit_ommers =
            matches!(variant, SealVariant::Clique | SealVariant::ProofOfStake);
        Self { config, variant, prohibit_ommers }
    }

    /// The chain configuration the engine runs under.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// The seal flavor.
    pub fn variant(&self) -> SealVariant {
        self.variant
    }

    /// Validates the intrinsic consistency of a block body against its
    /// header: transactions root, ommers hash, withdrawals root.
    pub fn pre_validate_block_body(
        &self,
        block: &Block,
        _state: &dyn BlockState,
    ) -> ValidationResult {
        let header = &block.header;
        let revision = self.config.revision(header.number, header.timestamp);

        let transactions_root = ordered_trie_root_with_encoder(
            &block.body.transactions,
            |txn: &Transaction, buf: &mut Vec<u8>| txn.encode_with(buf, false, false),
        );
        if transactions_root != header.transactions_root {
            return Err(ValidationError::WrongTransactionsRoot);
        }

        let mut ommers_rlp = Vec::new();
        block.body.ommers.encode(&mut ommers_rlp);
        if keccak256(&ommers_rlp) != header.ommers_hash {
            return Err(ValidationError::WrongOmmersHash);
        }

        match (&block.body.withdrawals, revision >= Revision::Shanghai) {
            (None, true) => return Err(ValidationError::MissingWithdrawals),
            (Some(_), false) => return Err(ValidationError::UnexpectedWithdrawals),
            (Some(withdrawals), true) => {
                let withdrawals_root = ordered_trie_root_with_encoder(
                    withdrawals,
                    |withdrawal: &Withdrawal, buf: &mut Vec<u8>| withdrawal.encode(buf),
                );
                if Some(withdrawals_root) != header.withdrawals_root {
                    return Err(ValidationError::WrongWithdrawalsRoot);
                }
            }
            (None, false) => {}
        }

        self.pre_validate_transactions(block)
    }

    /// Validates a header against its parent and the schedule rules.
    pub fn validate_block_header(
        &self,
        header: &BlockHeader,
        state: &dyn BlockState,
        with_future_timestamp_check: bool,
    ) -> ValidationResult {
        let Some(parent) = state.parent_header(header)? else {
            return Err(ValidationError::UnknownParent);
        };

        if header.timestamp <= parent.timestamp {
            return Err(ValidationError::InvalidTimestamp);
        }
        if with_future_timestamp_check {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default();
            if header.timestamp > now + MAX_FUTURE_BLOCK_TIME {
                return Err(ValidationError::FutureBlock);
            }
        }

        // authority chains seal inside extra data, so the cap is theirs
        if self.variant != SealVariant::Clique
            && header.extra_data.len() > MAX_EXTRA_DATA_BYTES
        {
            return Err(ValidationError::ExtraDataTooLong);
        }

        if header.gas_used > header.gas_limit {
            return Err(ValidationError::InvalidGasUsed);
        }
        self.validate_gas_limit(header, &parent)?;

        let expected_base_fee =
            expected_base_fee_per_gas(&parent, header.number, header.timestamp, &self.config);
        if header.base_fee_per_gas != expected_base_fee {
            return Err(match (header.base_fee_per_gas, expected_base_fee) {
                (None, Some(_)) => ValidationError::MissingBaseFee,
                _ => ValidationError::WrongBaseFee,
            });
        }

        let revision = self.config.revision(header.number, header.timestamp);
        if (revision >= Revision::Shanghai) != header.withdrawals_root.is_some() {
            return Err(if revision >= Revision::Shanghai {
                ValidationError::MissingWithdrawals
            } else {
                ValidationError::UnexpectedWithdrawals
            });
        }

        self.validate_difficulty(header, &parent)
    }

    fn validate_gas_limit(&self, header: &BlockHeader, parent: &BlockHeader) -> ValidationResult {
        let mut parent_gas_limit = parent.gas_limit;
        if self.config.london_block == Some(header.number) {
            // EIP-1559 doubles the limit at the activation boundary
            parent_gas_limit *= crate::ELASTICITY_MULTIPLIER;
        }
        let difference = header.gas_limit.abs_diff(parent_gas_limit);
        if difference >= parent_gas_limit / 1024 {
            return Err(ValidationError::InvalidGasLimit);
        }
        if header.gas_limit < MIN_GAS_LIMIT {
            return Err(ValidationError::InvalidGasLimit);
        }
        Ok(())
    }

    fn validate_difficulty(&self, header: &BlockHeader, parent: &BlockHeader) -> ValidationResult {
        match self.variant {
            SealVariant::Ethash => {
                let parent_has_ommers = parent.ommers_hash != EMPTY_LIST_HASH;
                let expected = canonical_difficulty(
                    header.number,
                    header.timestamp,
                    parent.difficulty,
                    parent.timestamp,
                    parent_has_ommers,
                    &self.config,
                );
                if expected != header.difficulty {
                    return Err(ValidationError::WrongDifficulty);
                }
                Ok(())
            }
            SealVariant::ProofOfStake => {
                if !header.difficulty.is_zero() {
                    return Err(ValidationError::WrongDifficulty);
                }
                Ok(())
            }
            SealVariant::NoProof | SealVariant::Clique => Ok(()),
        }
    }

    /// Validates the seal fields.
    ///
    /// Proof-of-stake headers must carry a zeroed nonce and an empty
    /// ommers hash (EIP-3675). Ethash DAG verification and Clique signer
    /// recovery are external concerns; their structural checks pass here.
    pub fn validate_seal(&self, header: &BlockHeader) -> ValidationResult {
        match self.variant {
            SealVariant::ProofOfStake => {
                if !header.nonce.is_zero() || header.ommers_hash != EMPTY_LIST_HASH {
                    return Err(ValidationError::InvalidSeal);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Validates the ommers of a block.
    pub fn validate_ommers(&self, block: &Block, state: &dyn BlockState) -> ValidationResult {
        let ommers = &block.body.ommers;
        if ommers.is_empty() {
            return Ok(());
        }
        if self.prohibit_ommers {
            return Err(ValidationError::TooManyOmmers);
        }
        if ommers.len() > 2 {
            return Err(ValidationError::TooManyOmmers);
        }
        if ommers.len() == 2 && ommers[0] == ommers[1] {
            return Err(ValidationError::DuplicateOmmer);
        }

        // ancestors within the kinship window, nearest first
        let mut ancestors = Vec::new();
        let mut number = block.header.number;
        let mut hash = block.header.parent_hash;
        for _ in 0..MAX_OMMER_DEPTH {
            if number == 0 {
                break;
            }
            number -= 1;
            let Some(ancestor) = state.header(number, hash)? else {
                break;
            };
            ancestors.push((number, hash, ancestor.parent_hash));
            hash = ancestor.parent_hash;
        }

        for ommer in ommers {
            let ommer_hash = ommer.hash();
            if ancestors.iter().any(|(_, ancestor_hash, _)| *ancestor_hash == ommer_hash) {
                // an ancestor itself is not an ommer
                return Err(ValidationError::NotAnOmmer);
            }
            // the ommer must be the child of an ancestor, i.e. a sibling
            // of one of the last six canonical ancestors
            let is_kin = ancestors
                .iter()
                .any(|(_, _, ancestor_parent)| *ancestor_parent == ommer.parent_hash);
            if !is_kin {
                return Err(ValidationError::NotAnOmmer);
            }
            if self.validate_block_header(ommer, state, false).is_err() {
                return Err(ValidationError::InvalidOmmerHeader);
            }
        }
        Ok(())
    }

    /// Validates every transaction of a block against the revision rules.
    pub fn pre_validate_transactions(&self, block: &Block) -> ValidationResult {
        let header = &block.header;
        let revision = self.config.revision(header.number, header.timestamp);
        for txn in &block.body.transactions {
            pre_validate_transaction(
                txn,
                revision,
                self.config.chain_id,
                header.base_fee_per_gas,
            )?;
        }
        Ok(())
    }

    /// Issues block and ommer rewards (pre-merge work chains) or processes
    /// withdrawals (proof of stake from Shanghai).
    pub fn finalize(&self, state: &mut dyn RewardState, block: &Block, revision: Revision) {
        match self.variant {
            SealVariant::Ethash | SealVariant::NoProof => {
                let block_reward = block_reward(revision);
                let mut miner_reward = block_reward;
                for ommer in &block.body.ommers {
                    let ommer_reward = U256::from(8 + ommer.number - block.header.number)
                        * block_reward
                        / U256::from(8u64);
                    state.add_balance(ommer.beneficiary, ommer_reward);
                    miner_reward += block_reward / U256::from(32u64);
                }
                state.add_balance(block.header.beneficiary, miner_reward);
            }
            SealVariant::Clique => {
                state.touch(block.header.beneficiary);
            }
            SealVariant::ProofOfStake => {
                if revision >= Revision::Shanghai {
                    if let Some(withdrawals) = &block.body.withdrawals {
                        for withdrawal in withdrawals {
                            state.add_balance(withdrawal.address, withdrawal.amount_wei());
                        }
                    }
                }
                state.touch(block.header.beneficiary);
            }
        }
    }

    /// The address receiving block rewards and fees.
    pub fn get_beneficiary(&self, header: &BlockHeader) -> Address {
        header.beneficiary
    }
}

/// The static block reward of a revision; zero after the merge.
pub fn block_reward(revision: Revision) -> U256 {
    let ether = U256::from(WEI_PER_ETHER);
    if revision >= Revision::Paris {
        U256::ZERO
    } else if revision >= Revision::Constantinople {
        U256::from(2u64) * ether
    } else if revision >= Revision::Byzantium {
        U256::from(3u64) * ether
    } else {
        U256::from(5u64) * ether
    }
}
