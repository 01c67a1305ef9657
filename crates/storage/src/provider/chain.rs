//! Header, body and canonical-chain access paths.

use crate::{
    keys::{BlockKey, RawKey},
    models::{HashValue, RawValue, RlpValue, StoredBlockBody, U64Value},
    provider::meta::increment_sequence,
    tables::{
        BlockBodies, BlockTransactions, CanonicalHashes, Difficulty, HeadHeader, HeaderNumbers,
        Headers, Senders,
    },
    StorageError, ADDRESS_LENGTH,
};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::Encodable;
use corten_primitives::{Block, BlockBody, BlockHeader, Transaction};
use reth_db_api::{
    cursor::{DbCursorRO, DbCursorRW},
    table::Table,
    transaction::{DbTx, DbTxMut},
};
use tracing::error;

/// Well-known key of the single `HeadHeader` row.
const HEAD_HEADER_KEY: &str = "HeadHeader";

/// Chain data access over one transaction.
#[derive(Debug)]
pub struct ChainProvider<'tx, TX> {
    tx: &'tx TX,
}

impl<'tx, TX> ChainProvider<'tx, TX> {
    /// Creates a provider over `tx`.
    pub const fn new(tx: &'tx TX) -> Self {
        Self { tx }
    }
}

impl<TX: DbTx> ChainProvider<'_, TX> {
    /// Reads a header by `(number, hash)`.
    pub fn read_header(
        &self,
        number: u64,
        hash: B256,
    ) -> Result<Option<BlockHeader>, StorageError> {
        Ok(self.tx.get::<Headers>(BlockKey::new(number, hash))?.map(|value| value.0))
    }

    /// Reads a header by hash, via the header-numbers index.
    pub fn read_header_by_hash(&self, hash: B256) -> Result<Option<BlockHeader>, StorageError> {
        let Some(number) = self.read_block_number(hash)? else {
            return Ok(None);
        };
        self.read_header(number, hash)
    }

    /// Resolves a header hash to its block number.
    pub fn read_block_number(&self, hash: B256) -> Result<Option<u64>, StorageError> {
        Ok(self.tx.get::<HeaderNumbers>(hash)?.map(|value| value.0))
    }

    /// Reads the canonical hash at a height.
    pub fn read_canonical_hash(&self, number: u64) -> Result<Option<B256>, StorageError> {
        Ok(self.tx.get::<CanonicalHashes>(number)?.map(|value| value.0))
    }

    /// Reads the canonical header at a height.
    pub fn read_canonical_header(&self, number: u64) -> Result<Option<BlockHeader>, StorageError> {
        let Some(hash) = self.read_canonical_hash(number)? else {
            return Ok(None);
        };
        self.read_header(number, hash)
    }

    /// Reads the highest entry of the canonical-hash table.
    pub fn read_canonical_head(&self) -> Result<(u64, B256), StorageError> {
        let mut cursor = self.tx.cursor_read::<CanonicalHashes>()?;
        Ok(cursor.last()?.map(|(number, hash)| (number, hash.0)).unwrap_or_default())
    }

    /// Reads the total difficulty of a block.
    pub fn read_total_difficulty(
        &self,
        number: u64,
        hash: B256,
    ) -> Result<Option<U256>, StorageError> {
        Ok(self.tx.get::<Difficulty>(BlockKey::new(number, hash))?.map(|value| value.0))
    }

    /// Whether a body is stored for `(number, hash)`.
    pub fn has_body(&self, number: u64, hash: B256) -> Result<bool, StorageError> {
        Ok(self.tx.get::<BlockBodies>(BlockKey::new(number, hash))?.is_some())
    }

    /// Reads a block body; `None` when missing.
    pub fn read_body(&self, number: u64, hash: B256) -> Result<Option<BlockBody>, StorageError> {
        let Some(RlpValue(stored)) = self.tx.get::<BlockBodies>(BlockKey::new(number, hash))?
        else {
            return Ok(None);
        };
        let transactions = self.read_transactions(stored.base_txn_id, stored.txn_count)?;
        Ok(Some(BlockBody { transactions, ommers: stored.ommers, withdrawals: None }))
    }

    /// Reads `count` transactions starting at sequence id `base_id`.
    pub fn read_transactions(
        &self,
        base_id: u64,
        count: u64,
    ) -> Result<Vec<Transaction>, StorageError> {
        let mut out = Vec::with_capacity(count as usize);
        if count == 0 {
            return Ok(out);
        }
        let mut cursor = self.tx.cursor_read::<BlockTransactions>()?;
        let mut entry = cursor.seek_exact(base_id)?;
        while let Some((id, RlpValue(txn))) = entry {
            if id >= base_id + count {
                break;
            }
            out.push(txn);
            entry = cursor.next()?;
        }
        if out.len() != count as usize {
            error!(
                target: "storage",
                base_id,
                expected = count,
                got = out.len(),
                "transaction range has holes"
            );
            return Err(StorageError::EntryNotFound("transaction range has holes"));
        }
        Ok(out)
    }

    /// Reads the recovered senders recorded for a block.
    pub fn read_senders(&self, number: u64, hash: B256) -> Result<Vec<Address>, StorageError> {
        let Some(raw) = self.tx.get::<Senders>(BlockKey::new(number, hash))? else {
            return Ok(Vec::new());
        };
        if raw.0.len() % ADDRESS_LENGTH != 0 {
            return Err(StorageError::EntryNotFound("malformed senders record"));
        }
        Ok(raw.0.chunks_exact(ADDRESS_LENGTH).map(Address::from_slice).collect())
    }

    /// Reads a block, optionally filling in senders (recorded ones first,
    /// recovered from signatures where pruned).
    pub fn read_block(
        &self,
        number: u64,
        hash: B256,
        with_senders: bool,
    ) -> Result<Option<Block>, StorageError> {
        let Some(header) = self.read_header(number, hash)? else {
            return Ok(None);
        };
        let Some(mut body) = self.read_body(number, hash)? else {
            return Ok(None);
        };
        if with_senders && !body.transactions.is_empty() {
            let senders = self.read_senders(number, hash)?;
            if senders.len() == body.transactions.len() {
                for (txn, sender) in body.transactions.iter_mut().zip(senders) {
                    txn.from = Some(sender);
                }
            } else {
                for txn in &mut body.transactions {
                    txn.from = txn.recover_sender();
                }
            }
        }
        Ok(Some(Block { header, body }))
    }

    /// Reads the canonical block at a height.
    pub fn read_canonical_block(
        &self,
        number: u64,
        with_senders: bool,
    ) -> Result<Option<Block>, StorageError> {
        let Some(hash) = self.read_canonical_hash(number)? else {
            return Ok(None);
        };
        self.read_block(number, hash, with_senders)
    }

    /// All headers stored at a height, canonical or not.
    pub fn read_headers_at_height(&self, number: u64) -> Result<Vec<BlockHeader>, StorageError> {
        let mut cursor = self.tx.cursor_read::<Headers>()?;
        let mut headers = Vec::new();
        let mut entry = cursor.seek(BlockKey::new(number, B256::ZERO))?;
        while let Some((key, RlpValue(header))) = entry {
            if key.number != number {
                break;
            }
            headers.push(header);
            entry = cursor.next()?;
        }
        Ok(headers)
    }

    /// Walks headers from the highest key downward, at most `limit` of
    /// them, invoking `visit` for each.
    pub fn read_headers_in_reverse_order(
        &self,
        limit: usize,
        mut visit: impl FnMut(BlockHeader),
    ) -> Result<usize, StorageError> {
        let mut cursor = self.tx.cursor_read::<Headers>()?;
        let mut count = 0usize;
        let mut entry = cursor.last()?;
        while let Some((_, RlpValue(header))) = entry {
            if count == limit {
                break;
            }
            visit(header);
            count += 1;
            entry = cursor.prev()?;
        }
        Ok(count)
    }

    /// Highest block number present in the header table.
    pub fn read_block_progress(&self) -> Result<u64, StorageError> {
        let mut progress = 0;
        self.read_headers_in_reverse_order(1, |header| progress = header.number)?;
        Ok(progress)
    }

    /// Reads the recorded head header hash.
    pub fn read_head_header_hash(&self) -> Result<Option<B256>, StorageError> {
        Ok(self.tx.get::<HeadHeader>(RawKey::from_name(HEAD_HEADER_KEY))?.map(|value| value.0))
    }
}

impl<TX: DbTx + DbTxMut> ChainProvider<'_, TX> {
    /// Writes a header (idempotent upsert) and its number index entry.
    /// Returns the header hash.
    pub fn write_header(&self, header: &BlockHeader) -> Result<B256, StorageError> {
        let mut encoded = Vec::with_capacity(header.length());
        header.encode(&mut encoded);
        // hash over the bytes just produced instead of re-encoding
        let hash = keccak256(&encoded);
        self.tx.put::<Headers>(BlockKey::new(header.number, hash), RlpValue(header.clone()))?;
        self.tx.put::<HeaderNumbers>(hash, U64Value(header.number))?;
        Ok(hash)
    }

    /// Writes the canonical hash at a height.
    pub fn write_canonical_hash(&self, number: u64, hash: B256) -> Result<(), StorageError> {
        self.tx.put::<CanonicalHashes>(number, HashValue(hash))?;
        Ok(())
    }

    /// Deletes the canonical hash at a height; missing entries are fine.
    pub fn delete_canonical_hash(&self, number: u64) -> Result<(), StorageError> {
        self.tx.delete::<CanonicalHashes>(number, None)?;
        Ok(())
    }

    /// Writes the total difficulty of a block.
    pub fn write_total_difficulty(
        &self,
        number: u64,
        hash: B256,
        total_difficulty: U256,
    ) -> Result<(), StorageError> {
        self.tx
            .put::<Difficulty>(BlockKey::new(number, hash), RlpValue(total_difficulty))?;
        Ok(())
    }

    /// Writes a block body. Transaction ids are allocated from the
    /// sequence counter and the rows appended in id order.
    pub fn write_body(
        &self,
        number: u64,
        hash: B256,
        body: &BlockBody,
    ) -> Result<(), StorageError> {
        let txn_count = body.transactions.len() as u64;
        let base_txn_id =
            increment_sequence(self.tx, BlockTransactions::NAME, txn_count)?;
        let stored =
            StoredBlockBody { base_txn_id, txn_count, ommers: body.ommers.clone() };
        self.tx.put::<BlockBodies>(BlockKey::new(number, hash), RlpValue(stored))?;

        if !body.transactions.is_empty() {
            let mut cursor = self.tx.cursor_write::<BlockTransactions>()?;
            for (offset, txn) in body.transactions.iter().enumerate() {
                cursor.append(base_txn_id + offset as u64, &RlpValue(txn.clone()))?;
            }
        }
        Ok(())
    }

    /// Records the recovered senders of a block.
    pub fn write_senders(
        &self,
        number: u64,
        hash: B256,
        senders: &[Address],
    ) -> Result<(), StorageError> {
        let mut value = Vec::with_capacity(senders.len() * ADDRESS_LENGTH);
        for sender in senders {
            value.extend_from_slice(sender.as_slice());
        }
        self.tx.put::<Senders>(BlockKey::new(number, hash), RawValue(value))?;
        Ok(())
    }

    /// Deletes the senders record of a block.
    pub fn delete_senders(&self, number: u64, hash: B256) -> Result<(), StorageError> {
        self.tx.delete::<Senders>(BlockKey::new(number, hash), None)?;
        Ok(())
    }

    /// Records the highest head header hash.
    pub fn write_head_header_hash(&self, hash: B256) -> Result<(), StorageError> {
        self.tx.put::<HeadHeader>(RawKey::from_name(HEAD_HEADER_KEY), HashValue(hash))?;
        Ok(())
    }
}
