//! Core data model of the execution client: block headers, the three
//! transaction kinds, block bodies, accounts with the storage-compatible
//! encoding, receipts and withdrawals.
//!
//! RLP here is bit-exact with Ethereum's canonical encoding. Typed
//! transactions (EIP-2718) are prefixed with their type byte outside RLP;
//! inside block bodies they are additionally wrapped as an RLP byte string.

mod account;
mod block;
mod error;
mod header;
mod receipt;
mod transaction;
mod withdrawal;

pub use account::{Account, DEFAULT_INCARNATION};
pub use block::{Block, BlockBody, BlockWithHash};
pub use error::DecodingError;
pub use header::{BlockHeader, BlockId, ChainHead};
pub use receipt::{logs_bloom, Log, Receipt};
pub use transaction::{
    decode_transaction, is_valid_signature, AccessListEntry, Eip2718Wrapping, Transaction, TxType,
};
pub use withdrawal::Withdrawal;

use alloy_primitives::{b256, B256};

/// Keccak-256 of the empty byte string.
pub const EMPTY_HASH: B256 =
    b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

/// Root of the empty Merkle-Patricia trie.
pub const EMPTY_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Keccak-256 of the RLP encoding of an empty list; the ommers hash of a
/// block without uncles.
pub const EMPTY_LIST_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Block numbers are 64-bit.
pub type BlockNum = u64;
