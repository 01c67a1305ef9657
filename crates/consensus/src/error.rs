//! Validation outcomes.
//!
//! Validation failures are values: they flow upward through the pipeline
//! and surface in the verification result, never as panics.

use thiserror::Error;

/// Everything header, body or transaction validation can object to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The parent header is not known.
    #[error("unknown parent header")]
    UnknownParent,
    /// The parent's total difficulty is not known.
    #[error("unknown parent total difficulty")]
    UnknownParentTotalDifficulty,
    /// The transaction names a different chain.
    #[error("wrong chain id")]
    WrongChainId,
    /// The header difficulty does not match the canonical schedule.
    #[error("wrong difficulty")]
    WrongDifficulty,
    /// The seal fields are invalid.
    #[error("invalid seal")]
    InvalidSeal,
    /// An ommer header failed validation.
    #[error("invalid ommer header")]
    InvalidOmmerHeader,
    /// A proof-of-work block appeared after the merge.
    #[error("proof-of-work block after the merge")]
    PoWBlockAfterMerge,
    /// A proof-of-stake block appeared before the merge.
    #[error("proof-of-stake block before the merge")]
    PoSBlockBeforeMerge,
    /// The fee cap is below the block base fee.
    #[error("max fee per gas less than block base fee")]
    MaxFeeLessThanBase,
    /// The priority fee exceeds the fee cap.
    #[error("max priority fee greater than max fee")]
    MaxPriorityFeeGreaterThanMax,
    /// The gas limit does not cover intrinsic gas.
    #[error("intrinsic gas exceeds gas limit")]
    IntrinsicGas,
    /// The nonce is at the EIP-2681 ceiling.
    #[error("nonce too high")]
    NonceTooHigh,
    /// Init code exceeds the EIP-3860 limit.
    #[error("max init code size exceeded")]
    MaxInitCodeSizeExceeded,
    /// The signature is not a valid secp256k1 signature.
    #[error("invalid signature")]
    InvalidSignature,
    /// The transaction type is not enabled at this revision.
    #[error("unsupported transaction type")]
    UnsupportedTransactionType,
    /// The gas limit is out of the permitted drift bounds.
    #[error("invalid gas limit")]
    InvalidGasLimit,
    /// Gas used exceeds the gas limit or mismatches the receipts.
    #[error("invalid gas used")]
    InvalidGasUsed,
    /// The timestamp does not advance past the parent.
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// The timestamp is too far in the future.
    #[error("block from the future")]
    FutureBlock,
    /// The extra-data field exceeds its cap.
    #[error("extra data too long")]
    ExtraDataTooLong,
    /// The ommers hash does not match the body.
    #[error("wrong ommers hash")]
    WrongOmmersHash,
    /// The transactions root does not match the body.
    #[error("wrong transactions root")]
    WrongTransactionsRoot,
    /// The receipts root does not match the computed receipts.
    #[error("wrong receipts root")]
    WrongReceiptsRoot,
    /// The logs bloom does not match the computed receipts.
    #[error("wrong logs bloom")]
    WrongLogsBloom,
    /// The withdrawals root does not match the body.
    #[error("wrong withdrawals root")]
    WrongWithdrawalsRoot,
    /// Withdrawals are required from Shanghai.
    #[error("missing withdrawals")]
    MissingWithdrawals,
    /// Withdrawals are not allowed before Shanghai.
    #[error("unexpected withdrawals")]
    UnexpectedWithdrawals,
    /// The base fee does not match the EIP-1559 schedule.
    #[error("wrong base fee")]
    WrongBaseFee,
    /// A base fee is required from London.
    #[error("missing base fee")]
    MissingBaseFee,
    /// More than two ommers.
    #[error("too many ommers")]
    TooManyOmmers,
    /// The same ommer appears twice.
    #[error("duplicate ommer")]
    DuplicateOmmer,
    /// The ommer is not a kin of this block.
    #[error("not an ommer")]
    NotAnOmmer,
    /// A transaction is missing its recovered sender.
    #[error("missing sender")]
    MissingSender,
    /// The sender's balance or nonce does not admit the transaction.
    #[error("insufficient funds")]
    InsufficientFunds,
    /// The sender nonce does not match the transaction nonce.
    #[error("wrong nonce")]
    WrongNonce,
    /// The chain names a consensus engine this build cannot run.
    #[error("unknown consensus engine")]
    UnknownConsensusEngine,
    /// The underlying state could not be read.
    #[error("state access failure during validation")]
    StateAccess,
}

/// Outcome of a validation step.
pub type ValidationResult = Result<(), ValidationError>;
