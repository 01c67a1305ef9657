//! Applies one block to the buffered state.

use crate::execution::{
    evm::{Evm, ExecutionOutcome},
    state::IntraBlockState,
};
use crate::StageError;
use alloy_primitives::{Bloom, U256};
use alloy_trie::root::ordered_trie_root_with_encoder;
use corten_chainspec::Revision;
use corten_consensus::{ConsensusEngine, ValidationError};
use corten_primitives::{logs_bloom, Block, Receipt};

/// Applies blocks: validates each transaction against the sender state,
/// runs it through the EVM seam, accumulates receipts, verifies the
/// header's gas, receipts-root and bloom commitments, and finalizes.
#[derive(Debug)]
pub struct ExecutionProcessor<'a, E> {
    engine: &'a ConsensusEngine,
    evm: &'a mut E,
}

impl<'a, E: Evm> ExecutionProcessor<'a, E> {
    /// Creates a processor.
    pub fn new(engine: &'a ConsensusEngine, evm: &'a mut E) -> Self {
        Self { engine, evm }
    }

    /// Executes every transaction of `block` and finalizes it, returning
    /// the receipts. Validation objections surface as
    /// [`StageError::Validation`].
    pub fn execute_block(
        &mut self,
        state: &mut IntraBlockState<'_>,
        block: &Block,
        revision: Revision,
    ) -> Result<Vec<Receipt>, StageError> {
        let header = &block.header;
        let base_fee = header.base_fee_per_gas.unwrap_or_default();
        let beneficiary = self.engine.get_beneficiary(header);

        let mut cumulative_gas_used = 0u64;
        let mut receipts = Vec::with_capacity(block.body.transactions.len());

        for txn in &block.body.transactions {
            let sender = txn.from.ok_or(ValidationError::MissingSender)?;

            // checks against the sender state
            let account = state.get_account(sender)?.unwrap_or_default();
            if account.nonce != txn.nonce {
                return Err(ValidationError::WrongNonce.into());
            }
            let max_cost = U256::from(txn.gas_limit) * txn.max_fee_per_gas + txn.value;
            if account.balance < max_cost {
                return Err(ValidationError::InsufficientFunds.into());
            }
            if cumulative_gas_used + txn.gas_limit > header.gas_limit {
                return Err(ValidationError::InvalidGasUsed.into());
            }

            state.set_nonce(sender, txn.nonce + 1)?;
            let ExecutionOutcome { success, gas_used, logs } =
                self.evm.execute(state, header, txn, sender, revision)?;

            // the base fee burns; the producer keeps the priority fee
            let fee = U256::from(gas_used) * txn.effective_gas_price(base_fee);
            state.sub_from_balance(sender, fee)?;
            let tip = U256::from(gas_used) * txn.priority_fee_per_gas(base_fee);
            state.add_to_balance(beneficiary, tip)?;

            cumulative_gas_used += gas_used;
            receipts.push(Receipt {
                tx_type: txn.tx_type,
                success,
                cumulative_gas_used,
                bloom: logs_bloom(&logs),
                logs,
            });
        }

        if cumulative_gas_used != header.gas_used {
            return Err(ValidationError::InvalidGasUsed.into());
        }
        // receipt commitments are checked from Byzantium; earlier receipts
        // commit to intermediate state roots this core does not track
        if revision >= Revision::Byzantium {
            let receipts_root =
                ordered_trie_root_with_encoder(&receipts, |receipt: &Receipt, buf| {
                    receipt.encode_for_root(buf)
                });
            if receipts_root != header.receipts_root {
                return Err(ValidationError::WrongReceiptsRoot.into());
            }
            let bloom = receipts.iter().fold(Bloom::ZERO, |acc, receipt| acc | receipt.bloom);
            if bloom != header.logs_bloom {
                return Err(ValidationError::WrongLogsBloom.into());
            }
        }

        self.engine.finalize(state, block, revision);
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::evm::TransferEvm;
    use crate::execution::state::StateReader;
    use alloy_primitives::{Address, B256};
    use corten_chainspec::ChainConfig;
    use corten_consensus::engine_factory;
    use corten_primitives::{Account, BlockBody, BlockHeader, Transaction, TxType, EMPTY_ROOT};
    use corten_storage::StorageError;

    struct FundedReader(Address, U256);
    impl StateReader for FundedReader {
        fn read_account(&self, address: Address) -> Result<Option<Account>, StorageError> {
            Ok((address == self.0)
                .then(|| Account { balance: self.1, ..Default::default() }))
        }
        fn read_storage(&self, _: Address, _: u64, _: B256) -> Result<B256, StorageError> {
            Ok(B256::ZERO)
        }
        fn read_code(&self, _: B256) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }
        fn read_previous_incarnation(&self, _: Address) -> Result<Option<u64>, StorageError> {
            Ok(None)
        }
    }

    fn engine() -> ConsensusEngine {
        engine_factory(&ChainConfig { chain_id: 1, ..Default::default() }).unwrap()
    }

    fn transfer(nonce: u64, value: u64, sender: Address) -> Transaction {
        Transaction {
            tx_type: TxType::Legacy,
            nonce,
            gas_limit: 21_000,
            to: Some(Address::repeat_byte(0x99)),
            value: U256::from(value),
            max_fee_per_gas: U256::from(1u64),
            max_priority_fee_per_gas: U256::from(1u64),
            from: Some(sender),
            ..Default::default()
        }
    }

    fn block_for(transactions: Vec<Transaction>, gas_used: u64) -> Block {
        let receipts: Vec<Receipt> = transactions
            .iter()
            .scan(0u64, |acc, txn| {
                *acc += 21_000;
                Some(Receipt {
                    tx_type: txn.tx_type,
                    success: true,
                    cumulative_gas_used: *acc,
                    ..Default::default()
                })
            })
            .collect();
        let receipts_root =
            ordered_trie_root_with_encoder(&receipts, |receipt: &Receipt, buf| {
                receipt.encode_for_root(buf)
            });
        Block {
            header: BlockHeader {
                number: 1,
                gas_limit: 30_000_000,
                gas_used,
                receipts_root,
                transactions_root: EMPTY_ROOT,
                beneficiary: Address::repeat_byte(0xee),
                ..Default::default()
            },
            body: BlockBody { transactions, ..Default::default() },
        }
    }

    #[test]
    fn executes_transfers_and_pays_the_producer() {
        let sender = Address::repeat_byte(1);
        let reader = FundedReader(sender, U256::from(10_000_000u64));
        let mut state = IntraBlockState::new(&reader);

        let block = block_for(vec![transfer(0, 1_000, sender)], 21_000);
        let engine = engine();
        let mut evm = TransferEvm;
        let receipts = ExecutionProcessor::new(&engine, &mut evm)
            .execute_block(&mut state, &block, Revision::Paris)
            .unwrap();

        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].cumulative_gas_used, 21_000);
        // sender paid value + gas at one wei per gas
        assert_eq!(
            state.get_balance(sender).unwrap(),
            U256::from(10_000_000u64 - 1_000 - 21_000)
        );
        assert_eq!(
            state.get_balance(Address::repeat_byte(0x99)).unwrap(),
            U256::from(1_000u64)
        );
        assert_eq!(
            state.get_balance(block.header.beneficiary).unwrap(),
            U256::from(21_000u64)
        );
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let sender = Address::repeat_byte(1);
        let reader = FundedReader(sender, U256::from(10_000_000u64));
        let mut state = IntraBlockState::new(&reader);

        let block = block_for(vec![transfer(5, 1, sender)], 21_000);
        let engine = engine();
        let mut evm = TransferEvm;
        let err = ExecutionProcessor::new(&engine, &mut evm)
            .execute_block(&mut state, &block, Revision::Paris)
            .unwrap_err();
        assert!(matches!(err, StageError::Validation(ValidationError::WrongNonce)));
    }

    #[test]
    fn insufficient_funds_is_rejected() {
        let sender = Address::repeat_byte(1);
        let reader = FundedReader(sender, U256::from(100u64));
        let mut state = IntraBlockState::new(&reader);

        let block = block_for(vec![transfer(0, 1_000, sender)], 21_000);
        let engine = engine();
        let mut evm = TransferEvm;
        let err = ExecutionProcessor::new(&engine, &mut evm)
            .execute_block(&mut state, &block, Revision::Paris)
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Validation(ValidationError::InsufficientFunds)
        ));
    }

    #[test]
    fn gas_used_mismatch_is_rejected() {
        let sender = Address::repeat_byte(1);
        let reader = FundedReader(sender, U256::from(10_000_000u64));
        let mut state = IntraBlockState::new(&reader);

        let block = block_for(vec![transfer(0, 1, sender)], 20_000);
        let engine = engine();
        let mut evm = TransferEvm;
        let err = ExecutionProcessor::new(&engine, &mut evm)
            .execute_block(&mut state, &block, Revision::Paris)
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Validation(ValidationError::InvalidGasUsed)
        ));
    }
}
