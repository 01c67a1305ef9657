//! Transaction receipts and log blooms.

use crate::TxType;
use alloy_primitives::{Address, Bloom, BloomInput, Bytes, B256};
use alloy_rlp::{Encodable, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// A log record emitted during execution.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Unindexed payload.
    pub data: Bytes,
}

/// The receipt of one executed transaction.
///
/// Receipts are recomputed during execution and verified against the
/// header's receipts root; they are not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Type of the transaction this receipt belongs to.
    pub tx_type: TxType,
    /// Whether execution succeeded (post-Byzantium status field).
    pub success: bool,
    /// Gas used by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Bloom over the receipt's logs.
    pub bloom: Bloom,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
}

/// Bloom filter accumulated over a batch of logs.
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_slice()));
        for topic in &log.topics {
            bloom.accrue(BloomInput::Raw(topic.as_slice()));
        }
    }
    bloom
}

impl Receipt {
    fn payload_length(&self) -> usize {
        self.success.length()
            + self.cumulative_gas_used.length()
            + self.bloom.length()
            + self.logs.length()
    }

    /// EIP-2718 envelope of the receipt, as hashed into the receipts trie.
    pub fn encode_for_root(&self, out: &mut Vec<u8>) {
        if self.tx_type != TxType::Legacy {
            out.push(self.tx_type as u8);
        }
        alloy_rlp::Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.success.encode(out);
        self.cumulative_gas_used.encode(out);
        self.bloom.encode(out);
        self.logs.encode(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn bloom_covers_address_and_topics() {
        let log = Log {
            address: Address::repeat_byte(0x22),
            topics: vec![b256!(
                "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
            )],
            data: Bytes::from(vec![1, 2, 3]),
        };
        let bloom = logs_bloom([&log]);
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_slice())));
        assert!(bloom.contains_input(BloomInput::Raw(log.topics[0].as_slice())));
        assert!(!bloom.contains_input(BloomInput::Raw(&[0xff; 20])));
    }

    #[test]
    fn typed_receipt_envelope_starts_with_type_byte() {
        let receipt = Receipt {
            tx_type: TxType::Eip1559,
            success: true,
            cumulative_gas_used: 21_000,
            bloom: Bloom::ZERO,
            logs: vec![],
        };
        let mut out = Vec::new();
        receipt.encode_for_root(&mut out);
        assert_eq!(out[0], 2);

        let legacy = Receipt { tx_type: TxType::Legacy, ..receipt };
        let mut out = Vec::new();
        legacy.encode_for_root(&mut out);
        assert!(out[0] >= 0xc0);
    }
}
