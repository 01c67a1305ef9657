//! Transaction pre-validation and the fee/gas arithmetic it rests on.

use crate::{ValidationError, ValidationResult};
use alloy_primitives::U256;
use corten_chainspec::{Revision, INITIAL_BASE_FEE};
use corten_primitives::{is_valid_signature, BlockHeader, Transaction, TxType};

/// EIP-3860 init-code ceiling.
pub const MAX_INIT_CODE_SIZE: usize = 49_152;

/// Lowest permitted block gas limit.
pub const MIN_GAS_LIMIT: u64 = 5_000;

/// EIP-1559 gas-target elasticity.
pub const ELASTICITY_MULTIPLIER: u64 = 2;

const G_TRANSACTION: u64 = 21_000;
const G_TX_CREATE: u64 = 32_000;
const G_TX_DATA_ZERO: u64 = 4;
const G_TX_DATA_NON_ZERO_FRONTIER: u64 = 68;
const G_TX_DATA_NON_ZERO_ISTANBUL: u64 = 16;
const G_ACCESS_LIST_ADDRESS: u64 = 2_400;
const G_ACCESS_LIST_STORAGE_KEY: u64 = 1_900;
const G_INIT_CODE_WORD: u64 = 2;

/// Gas a transaction burns before the first EVM instruction.
pub fn intrinsic_gas(txn: &Transaction, revision: Revision) -> u128 {
    let mut gas: u128 = G_TRANSACTION as u128;

    let contract_creation = txn.to.is_none();
    if contract_creation && revision >= Revision::Homestead {
        gas += G_TX_CREATE as u128;
    }

    let non_zero_cost = if revision >= Revision::Istanbul {
        G_TX_DATA_NON_ZERO_ISTANBUL
    } else {
        G_TX_DATA_NON_ZERO_FRONTIER
    };
    let non_zero_bytes = txn.data.iter().filter(|byte| **byte != 0).count() as u128;
    let zero_bytes = txn.data.len() as u128 - non_zero_bytes;
    gas += zero_bytes * G_TX_DATA_ZERO as u128 + non_zero_bytes * non_zero_cost as u128;

    if revision >= Revision::Berlin {
        for entry in &txn.access_list {
            gas += G_ACCESS_LIST_ADDRESS as u128
                + entry.storage_keys.len() as u128 * G_ACCESS_LIST_STORAGE_KEY as u128;
        }
    }

    // EIP-3860: charge per init-code word
    if contract_creation && revision >= Revision::Shanghai {
        gas += txn.data.len().div_ceil(32) as u128 * G_INIT_CODE_WORD as u128;
    }
    gas
}

/// Validates one transaction against the rules active at `revision`,
/// short-circuiting in the canonical order.
pub fn pre_validate_transaction(
    txn: &Transaction,
    revision: Revision,
    chain_id: u64,
    base_fee_per_gas: Option<U256>,
) -> ValidationResult {
    if let Some(txn_chain_id) = txn.chain_id {
        if revision < Revision::SpuriousDragon || txn_chain_id != chain_id {
            return Err(ValidationError::WrongChainId);
        }
    }

    match txn.tx_type {
        TxType::Legacy => {}
        TxType::Eip2930 => {
            if revision < Revision::Berlin {
                return Err(ValidationError::UnsupportedTransactionType);
            }
        }
        TxType::Eip1559 => {
            if revision < Revision::London {
                return Err(ValidationError::UnsupportedTransactionType);
            }
        }
    }

    if let Some(base_fee) = base_fee_per_gas {
        if txn.max_fee_per_gas < base_fee {
            return Err(ValidationError::MaxFeeLessThanBase);
        }
    }

    if txn.max_priority_fee_per_gas > txn.max_fee_per_gas {
        return Err(ValidationError::MaxPriorityFeeGreaterThanMax);
    }

    // a cached sender means the signature was already verified
    if txn.from.is_none()
        && !is_valid_signature(txn.r, txn.s, revision >= Revision::Homestead)
    {
        return Err(ValidationError::InvalidSignature);
    }

    if (txn.gas_limit as u128) < intrinsic_gas(txn, revision) {
        return Err(ValidationError::IntrinsicGas);
    }

    // EIP-2681
    if txn.nonce >= u64::MAX {
        return Err(ValidationError::NonceTooHigh);
    }

    // EIP-3860
    if revision >= Revision::Shanghai && txn.to.is_none() && txn.data.len() > MAX_INIT_CODE_SIZE {
        return Err(ValidationError::MaxInitCodeSizeExceeded);
    }

    Ok(())
}

/// The base fee the EIP-1559 schedule demands of a child of `parent`, or
/// `None` before London.
pub fn expected_base_fee_per_gas(
    parent: &BlockHeader,
    block_number: u64,
    block_time: u64,
    config: &corten_chainspec::ChainConfig,
) -> Option<U256> {
    if config.revision(block_number, block_time) < Revision::London {
        return None;
    }
    if config.london_block == Some(block_number) {
        return Some(U256::from(INITIAL_BASE_FEE));
    }

    let parent_base_fee = parent.base_fee_per_gas.unwrap_or(U256::from(INITIAL_BASE_FEE));
    let parent_gas_target = parent.gas_limit / ELASTICITY_MULTIPLIER;

    if parent.gas_used == parent_gas_target {
        return Some(parent_base_fee);
    }
    if parent.gas_used > parent_gas_target {
        let gas_delta = U256::from(parent.gas_used - parent_gas_target);
        let fee_delta = core::cmp::max(
            U256::from(1u64),
            parent_base_fee * gas_delta / U256::from(parent_gas_target) / U256::from(8u64),
        );
        Some(parent_base_fee + fee_delta)
    } else {
        let gas_delta = U256::from(parent_gas_target - parent.gas_used);
        let fee_delta =
            parent_base_fee * gas_delta / U256::from(parent_gas_target) / U256::from(8u64);
        Some(parent_base_fee.saturating_sub(fee_delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};
    use corten_primitives::AccessListEntry;
    use rstest::rstest;

    fn valid_transfer() -> Transaction {
        Transaction {
            tx_type: TxType::Legacy,
            nonce: 1,
            max_priority_fee_per_gas: U256::from(2_000_000_000u64),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(1)),
            value: U256::from(1u64),
            chain_id: Some(1),
            r: U256::from(1u64),
            s: U256::from(1u64),
            ..Default::default()
        }
    }

    #[test]
    fn happy_path_passes() {
        assert_eq!(pre_validate_transaction(&valid_transfer(), Revision::London, 1, None), Ok(()));
    }

    #[rstest]
    #[case::wrong_chain(
        Transaction { chain_id: Some(5), ..valid_transfer() },
        Revision::London,
        ValidationError::WrongChainId
    )]
    #[case::chain_id_before_eip155(
        valid_transfer(),
        Revision::Homestead,
        ValidationError::WrongChainId
    )]
    #[case::eip1559_before_london(
        Transaction { tx_type: TxType::Eip1559, ..valid_transfer() },
        Revision::Berlin,
        ValidationError::UnsupportedTransactionType
    )]
    #[case::eip2930_before_berlin(
        Transaction { tx_type: TxType::Eip2930, ..valid_transfer() },
        Revision::Istanbul,
        ValidationError::UnsupportedTransactionType
    )]
    #[case::priority_above_max(
        Transaction {
            max_priority_fee_per_gas: U256::from(3_000_000_000u64),
            ..valid_transfer()
        },
        Revision::London,
        ValidationError::MaxPriorityFeeGreaterThanMax
    )]
    #[case::intrinsic_gas(
        Transaction { gas_limit: 20_999, ..valid_transfer() },
        Revision::London,
        ValidationError::IntrinsicGas
    )]
    #[case::nonce_ceiling(
        Transaction { nonce: u64::MAX, ..valid_transfer() },
        Revision::London,
        ValidationError::NonceTooHigh
    )]
    #[case::zero_signature(
        Transaction { r: U256::ZERO, ..valid_transfer() },
        Revision::London,
        ValidationError::InvalidSignature
    )]
    fn rejections(
        #[case] txn: Transaction,
        #[case] revision: Revision,
        #[case] expected: ValidationError,
    ) {
        assert_eq!(pre_validate_transaction(&txn, revision, 1, None), Err(expected));
    }

    #[test]
    fn base_fee_gate() {
        let txn = valid_transfer();
        assert_eq!(
            pre_validate_transaction(&txn, Revision::London, 1, Some(U256::from(3_000_000_000u64))),
            Err(ValidationError::MaxFeeLessThanBase)
        );
        assert_eq!(
            pre_validate_transaction(&txn, Revision::London, 1, Some(U256::from(1_000_000_000u64))),
            Ok(())
        );
    }

    #[test]
    fn init_code_cap_applies_from_shanghai() {
        let big_init = Transaction {
            to: None,
            gas_limit: 30_000_000,
            data: Bytes::from(vec![0u8; MAX_INIT_CODE_SIZE + 1]),
            ..valid_transfer()
        };
        assert_eq!(
            pre_validate_transaction(&big_init, Revision::Shanghai, 1, None),
            Err(ValidationError::MaxInitCodeSizeExceeded)
        );
        assert_eq!(pre_validate_transaction(&big_init, Revision::Paris, 1, None), Ok(()));
    }

    #[test]
    fn intrinsic_gas_schedule() {
        let mut txn = valid_transfer();
        assert_eq!(intrinsic_gas(&txn, Revision::Frontier), 21_000);

        txn.data = Bytes::from(vec![0, 0, 1, 2]);
        assert_eq!(intrinsic_gas(&txn, Revision::Berlin), 21_000 + 2 * 4 + 2 * 16);
        assert_eq!(intrinsic_gas(&txn, Revision::Homestead), 21_000 + 2 * 4 + 2 * 68);

        txn.access_list = vec![AccessListEntry {
            account: Address::repeat_byte(2),
            storage_keys: vec![Default::default(); 3],
        }];
        assert_eq!(
            intrinsic_gas(&txn, Revision::Berlin),
            21_000 + 2 * 4 + 2 * 16 + 2_400 + 3 * 1_900
        );

        // creation pays the deploy surcharge and, from Shanghai, per-word
        // init-code gas
        let create = Transaction { to: None, data: Bytes::from(vec![1u8; 64]), ..valid_transfer() };
        assert_eq!(
            intrinsic_gas(&create, Revision::Paris),
            21_000 + 32_000 + 64 * 16
        );
        assert_eq!(
            intrinsic_gas(&create, Revision::Shanghai),
            21_000 + 32_000 + 64 * 16 + 2 * 2
        );
    }

    #[test]
    fn base_fee_schedule_tracks_gas_usage() {
        let config = corten_chainspec::ChainConfig {
            london_block: Some(10),
            ..corten_chainspec::ChainConfig::default()
        };
        let parent = BlockHeader {
            number: 10,
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            base_fee_per_gas: Some(U256::from(INITIAL_BASE_FEE)),
            ..Default::default()
        };

        // pre-London: none; activation block: initial
        assert_eq!(expected_base_fee_per_gas(&parent, 9, 0, &config), None);
        assert_eq!(
            expected_base_fee_per_gas(&parent, 10, 0, &config),
            Some(U256::from(INITIAL_BASE_FEE))
        );

        // exactly at target: unchanged
        assert_eq!(
            expected_base_fee_per_gas(&parent, 11, 0, &config),
            Some(U256::from(INITIAL_BASE_FEE))
        );

        // a full parent raises the fee by an eighth
        let full = BlockHeader { gas_used: 30_000_000, ..parent.clone() };
        assert_eq!(
            expected_base_fee_per_gas(&full, 11, 0, &config),
            Some(U256::from(INITIAL_BASE_FEE + INITIAL_BASE_FEE / 8))
        );

        // an empty parent lowers it by an eighth
        let empty = BlockHeader { gas_used: 0, ..parent };
        assert_eq!(
            expected_base_fee_per_gas(&empty, 11, 0, &config),
            Some(U256::from(INITIAL_BASE_FEE - INITIAL_BASE_FEE / 8))
        );
    }
}
