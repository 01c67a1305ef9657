//! Blocks and block bodies.

use crate::{BlockHeader, Transaction, Withdrawal};
use alloy_rlp::{Decodable, Encodable};
use serde::{Deserialize, Serialize};

/// Transactions, ommers and (after Shanghai) withdrawals of one block.
///
/// The withdrawals list is a trailing optional of the body RLP, mirroring
/// the header's `withdrawals_root`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Transactions included in the block.
    pub transactions: Vec<Transaction>,
    /// Ommer headers; empty after the merge.
    pub ommers: Vec<BlockHeader>,
    /// Withdrawals, present from Shanghai.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

/// A full block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// The block body.
    pub body: BlockBody,
}

/// A block paired with its precomputed header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWithHash {
    /// The block.
    pub block: Block,
    /// Hash of the block header.
    pub hash: alloy_primitives::B256,
}

impl Block {
    /// Populates each transaction's `from` field from its signature.
    /// Transactions whose recovery fails keep `from = None`.
    pub fn recover_senders(&mut self) {
        for txn in &mut self.body.transactions {
            if txn.from.is_none() {
                txn.from = txn.recover_sender();
            }
        }
    }
}

impl BlockBody {
    fn payload_length(&self) -> usize {
        let tx_len: usize = self.transactions.iter().map(Encodable::length).sum();
        let ommers_len: usize = self.ommers.iter().map(Encodable::length).sum();
        let mut len = alloy_rlp::length_of_length(tx_len)
            + tx_len
            + alloy_rlp::length_of_length(ommers_len)
            + ommers_len;
        if let Some(withdrawals) = &self.withdrawals {
            len += withdrawals.length();
        }
        len
    }
}

impl Encodable for BlockBody {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        let tx_len: usize = self.transactions.iter().map(Encodable::length).sum();
        alloy_rlp::Header { list: true, payload_length: tx_len }.encode(out);
        for txn in &self.transactions {
            txn.encode(out);
        }
        let ommers_len: usize = self.ommers.iter().map(Encodable::length).sum();
        alloy_rlp::Header { list: true, payload_length: ommers_len }.encode(out);
        for ommer in &self.ommers {
            ommer.encode(out);
        }
        if let Some(withdrawals) = &self.withdrawals {
            withdrawals.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for BlockBody {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();

        let transactions = Vec::<Transaction>::decode(buf)?;
        let ommers = Vec::<BlockHeader>::decode(buf)?;
        let withdrawals = if started_len - buf.len() < rlp_head.payload_length {
            Some(Vec::<Withdrawal>::decode(buf)?)
        } else {
            None
        };

        if started_len - buf.len() != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: started_len - buf.len(),
            });
        }
        Ok(Self { transactions, ommers, withdrawals })
    }
}

impl Encodable for Block {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let body_payload = self.body.payload_length();
        let payload_length = self.header.length() + body_payload;
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        self.header.encode(out);
        // body fields are inlined in the block list, not nested
        let tx_len: usize = self.body.transactions.iter().map(Encodable::length).sum();
        alloy_rlp::Header { list: true, payload_length: tx_len }.encode(out);
        for txn in &self.body.transactions {
            txn.encode(out);
        }
        let ommers_len: usize = self.body.ommers.iter().map(Encodable::length).sum();
        alloy_rlp::Header { list: true, payload_length: ommers_len }.encode(out);
        for ommer in &self.body.ommers {
            ommer.encode(out);
        }
        if let Some(withdrawals) = &self.body.withdrawals {
            withdrawals.encode(out);
        }
    }

    fn length(&self) -> usize {
        let payload_length = self.header.length() + self.body.payload_length();
        payload_length + alloy_rlp::length_of_length(payload_length)
    }
}

impl Decodable for Block {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let rlp_head = alloy_rlp::Header::decode(buf)?;
        if !rlp_head.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let started_len = buf.len();

        let header = BlockHeader::decode(buf)?;
        let transactions = Vec::<Transaction>::decode(buf)?;
        let ommers = Vec::<BlockHeader>::decode(buf)?;
        let withdrawals = if started_len - buf.len() < rlp_head.payload_length {
            Some(Vec::<Withdrawal>::decode(buf)?)
        } else {
            None
        };

        if started_len - buf.len() != rlp_head.payload_length {
            return Err(alloy_rlp::Error::ListLengthMismatch {
                expected: rlp_head.payload_length,
                got: started_len - buf.len(),
            });
        }
        Ok(Self { header, body: BlockBody { transactions, ommers, withdrawals } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Transaction, TxType};
    use alloy_primitives::{Address, U256};

    fn sample_body() -> BlockBody {
        BlockBody {
            transactions: vec![
                Transaction {
                    tx_type: TxType::Legacy,
                    nonce: 1,
                    max_priority_fee_per_gas: U256::from(10u64),
                    max_fee_per_gas: U256::from(10u64),
                    gas_limit: 21_000,
                    to: Some(Address::repeat_byte(0xaa)),
                    value: U256::from(100u64),
                    chain_id: Some(1),
                    r: U256::from(1u64),
                    s: U256::from(2u64),
                    ..Default::default()
                },
                Transaction {
                    tx_type: TxType::Eip1559,
                    nonce: 2,
                    max_priority_fee_per_gas: U256::from(1u64),
                    max_fee_per_gas: U256::from(20u64),
                    gas_limit: 30_000,
                    to: None,
                    chain_id: Some(1),
                    r: U256::from(3u64),
                    s: U256::from(4u64),
                    odd_y_parity: true,
                    ..Default::default()
                },
            ],
            ommers: vec![],
            withdrawals: None,
        }
    }

    #[test]
    fn body_roundtrip_mixed_tx_types() {
        let body = sample_body();
        let mut encoded = Vec::new();
        body.encode(&mut encoded);
        assert_eq!(encoded.len(), body.length());
        let decoded = BlockBody::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn body_roundtrip_with_withdrawals() {
        let body = BlockBody {
            withdrawals: Some(vec![Withdrawal {
                index: 17,
                validator_index: 3,
                address: Address::repeat_byte(0x01),
                amount: 2_000_000_000,
            }]),
            ..sample_body()
        };
        let mut encoded = Vec::new();
        body.encode(&mut encoded);
        let decoded = BlockBody::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn block_roundtrip() {
        let block = Block { header: BlockHeader::default(), body: sample_body() };
        let mut encoded = Vec::new();
        block.encode(&mut encoded);
        assert_eq!(encoded.len(), block.length());
        let decoded = Block::decode(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded, block);
    }
}
