//! Seams between consensus validation and the state it reads or rewards.

use crate::ValidationError;
use alloy_primitives::{Address, B256, U256};
use corten_primitives::BlockHeader;

/// Read access to already-known headers and their total difficulties.
///
/// Implementations map infrastructure failures to
/// [`ValidationError::StateAccess`]; absence is `Ok(None)`.
pub trait BlockState {
    /// Reads a header by `(number, hash)`.
    fn header(&self, number: u64, hash: B256) -> Result<Option<BlockHeader>, ValidationError>;

    /// Reads the total difficulty of a block.
    fn total_difficulty(&self, number: u64, hash: B256)
        -> Result<Option<U256>, ValidationError>;

    /// The parent of `header`, when known.
    fn parent_header(&self, header: &BlockHeader) -> Result<Option<BlockHeader>, ValidationError> {
        if header.number == 0 {
            return Ok(None);
        }
        self.header(header.number - 1, header.parent_hash)
    }
}

/// Balance credits issued by block finalization (rewards, withdrawals).
pub trait RewardState {
    /// Adds `amount` wei to `address`, creating the account if needed.
    fn add_balance(&mut self, address: Address, amount: U256);

    /// Marks `address` as touched so empty-account cleanup sees it.
    fn touch(&mut self, address: Address);
}
