//! Block header and the small identifiers derived from it.

use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{Decodable, Encodable};
use serde::{Deserialize, Serialize};

/// A `(number, hash)` pair identifying one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// Height of the block.
    pub number: u64,
    /// Hash of the block header.
    pub hash: B256,
}

/// The canonical head together with its accumulated difficulty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Height of the head block.
    pub number: u64,
    /// Hash of the head block.
    pub hash: B256,
    /// Total difficulty accumulated from genesis to the head.
    pub total_difficulty: U256,
}

/// An execution-layer block header.
///
/// `base_fee_per_gas` appears after London and `withdrawals_root` after
/// Shanghai; both are trailing optionals in the canonical RLP layout, so
/// their presence is recovered from the list length on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block header.
    pub parent_hash: B256,
    /// Hash of the RLP list of ommer headers.
    pub ommers_hash: B256,
    /// Address receiving block rewards and fees.
    pub beneficiary: Address,
    /// Root of the world-state trie after this block.
    pub state_root: B256,
    /// Root of the transactions trie of this block.
    pub transactions_root: B256,
    /// Root of the receipts trie of this block.
    pub receipts_root: B256,
    /// Union of the bloom filters of every receipt.
    pub logs_bloom: Bloom,
    /// Proof-of-work difficulty; zero for proof-of-stake blocks.
    pub difficulty: U256,
    /// Height of the block.
    pub number: u64,
    /// Gas limit of the block.
    pub gas_limit: u64,
    /// Total gas consumed by the block's transactions.
    pub gas_used: u64,
    /// Unix timestamp of the block.
    pub timestamp: u64,
    /// Arbitrary extra bytes chosen by the producer.
    pub extra_data: Bytes,
    /// Ethash mix hash, or the prev-randao value after the merge.
    pub mix_hash: B256,
    /// Ethash nonce; zero after the merge.
    pub nonce: B64,
    /// EIP-1559 base fee, present from London.
    pub base_fee_per_gas: Option<U256>,
    /// EIP-4895 withdrawals root, present from Shanghai.
    pub withdrawals_root: Option<B256>,
}

impl BlockHeader {
    /// Keccak-256 of the canonical RLP encoding of the header.
    pub fn hash(&self) -> B256 {
        let mut encoded = Vec::with_capacity(self.length());
        self.encode(&mut encoded);
        keccak256(&encoded)
    }

    /// The `(number, hash)` identifier of this header.
    pub fn id(&self) -> BlockId {
        BlockId { number: self.number, hash: self.hash() }
    }

    fn payload_length(&self) -> usize {
        let mut len = self.parent_hash.length()
            + self.ommers_hash.length()
            + self.beneficiary.length()
            + self.state_root.length()
            + self.transactions_root.length()
            + self.receipts_root.length()
            + self.logs_bloom.length()
            + self.difficulty.length()
            + self.number.length()
            + self.gas_limit.length()
            + self.gas_used.length()
            + self.timestamp.length()
            + self.extra_data.length()
            + self.mix_hash.length()
            + self.nonce.length();
        if let Some(base_fee) = &self.base_fee_per_gas {
            len += base_fee.length();
        }
        if let Some(root) = &self.withdrawals_root {
            len += root.length();
        }
        len
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.parent_hash.encode(out);
        self.ommers_hash.encode(out);
        self.beneficiary.encode(out);
        self.state_root.encode(out);
        self.transactions_root.encode(out);
        self.receipts_root.encode(out);
        self.logs_bloom.encode(out);
        self.difficulty.encode(out);
        self.number.encode(out);
        self.gas_limit.encode(out);
        self.gas_used.encode(out);
        self.timestamp.encode(out);
        self.extra_data.encode(out);
        self.mix_hash.encode(out);
        self.nonce.encode(out);
        if let Some(base_fee) = &self.base_fee_per_gas {
            base_fee.encode(out);
        }
        if let Some(root) = &self.withdrawals_root {
            root.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for BlockHeader {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();

        let mut this = Self {
            parent_hash: Decodable::decode(buf)?,
            ommers_hash: Decodable::decode(buf)?,
            beneficiary: Decodable::decode(buf)?,
            state_root: Decodable::decode(buf)?,
            transactions_root: Decodable::decode(buf)?,
            receipts_root: Decodable::decode(buf)?,
            logs_bloom: Decodable::decode(buf)?,
            difficulty: Decodable::decode(buf)?,
            number: Decodable::decode(buf)?,
            gas_limit: Decodable::decode(buf)?,
            gas_used: Decodable::decode(buf)?,
            timestamp: Decodable::decode(buf)?,
            extra_data: Decodable::decode(buf)?,
            mix_hash: Decodable::decode(buf)?,
            nonce: Decodable::decode(buf)?,
            base_fee_per_gas: None,
            withdrawals_root: None,
        };

        let consumed = |buf: &&[u8]| started_len - buf.len();
        if consumed(buf) < rlp_head.payload_length {
            this.base_fee_per_gas = Some(Decodable::decode(buf)?);
        }
        if consumed(buf) < rlp_head.payload_length {
            this.withdrawals_root = Some(Decodable::decode(buf)?);
        }

        if consumed(buf) != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: consumed(buf),
            });
        }
        Ok(this)
    }
}
