//! The EVM seam.
//!
//! The byte-code interpreter is an external collaborator: execution sees
//! it as a function from `(state, transaction, revision)` to an outcome
//! plus state changes applied through the buffered state handle. The
//! transfer-only implementation covers plain value movement and is what
//! the test suites drive blocks through.

use crate::{execution::state::IntraBlockState, StageError};
use alloy_primitives::Address;
use corten_chainspec::Revision;
use corten_consensus::intrinsic_gas;
use corten_primitives::{BlockHeader, Log, Transaction};

/// What executing one transaction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Logs emitted.
    pub logs: Vec<Log>,
}

/// A transaction executor.
pub trait Evm {
    /// Executes `txn` from `sender` against `state` under `revision`.
    fn execute(
        &mut self,
        state: &mut IntraBlockState<'_>,
        header: &BlockHeader,
        txn: &Transaction,
        sender: Address,
        revision: Revision,
    ) -> Result<ExecutionOutcome, StageError>;
}

/// An executor for chains of plain value transfers: moves `value`, burns
/// intrinsic gas, runs no byte code. Contract creations transfer the
/// endowment to the derived address without deploying code.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferEvm;

impl Evm for TransferEvm {
    fn execute(
        &mut self,
        state: &mut IntraBlockState<'_>,
        _header: &BlockHeader,
        txn: &Transaction,
        sender: Address,
        revision: Revision,
    ) -> Result<ExecutionOutcome, StageError> {
        let gas_used = intrinsic_gas(txn, revision) as u64;

        let recipient = match txn.to {
            Some(to) => to,
            // the nonce was already bumped for this transaction
            None => sender.create(txn.nonce),
        };
        if !txn.value.is_zero() {
            state.sub_from_balance(sender, txn.value)?;
            state.add_to_balance(recipient, txn.value)?;
        } else {
            state.touch(recipient);
        }

        Ok(ExecutionOutcome { success: true, gas_used, logs: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::state::StateReader;
    use alloy_primitives::{B256, U256};
    use corten_primitives::{Account, TxType};
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

    #[test]
    fn transfer_moves_value() {
        let sender = Address::repeat_byte(1);
        let recipient = Address::repeat_byte(2);
        let reader = FundedReader(sender, U256::from(1_000_000u64));
        let mut state = IntraBlockState::new(&reader);

        let txn = Transaction {
            tx_type: TxType::Legacy,
            gas_limit: 21_000,
            to: Some(recipient),
            value: U256::from(777u64),
            ..Default::default()
        };
        let outcome = TransferEvm
            .execute(&mut state, &BlockHeader::default(), &txn, sender, Revision::London)
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.gas_used, 21_000);
        assert_eq!(state.get_balance(recipient).unwrap(), U256::from(777u64));
        assert_eq!(
            state.get_balance(sender).unwrap(),
            U256::from(1_000_000u64 - 777)
        );
    }

    #[test]
    fn creation_endows_the_derived_address() {
        let sender = Address::repeat_byte(1);
        let reader = FundedReader(sender, U256::from(10_000u64));
        let mut state = IntraBlockState::new(&reader);

        let txn = Transaction {
            tx_type: TxType::Legacy,
            nonce: 0,
            gas_limit: 60_000,
            to: None,
            value: U256::from(5u64),
            ..Default::default()
        };
        let outcome = TransferEvm
            .execute(&mut state, &BlockHeader::default(), &txn, sender, Revision::London)
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            state.get_balance(sender.create(0)).unwrap(),
            U256::from(5u64)
        );
    }
}
