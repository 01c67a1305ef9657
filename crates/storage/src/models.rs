//! Value types stored in the tables, and the glue that wires them into the
//! store's compression traits.
//!
//! On-disk value formats are fixed: canonical RLP for headers,
//! transactions, difficulties and stored bodies; the storage-compatible
//! compact encodings for accounts and trie nodes; raw bytes elsewhere.

use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use corten_primitives::BlockHeader;
use reth_db_api::{
    table::{Compress, Decompress},
    DatabaseError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Raw bytes value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawValue(pub Vec<u8>);

impl From<Vec<u8>> for RawValue {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for RawValue {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl Compress for RawValue {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
        buf.put_slice(&self.0);
    }
}

impl Decompress for RawValue {
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        Ok(Self(value.to_vec()))
    }
}

/// A 32-byte hash value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashValue(pub B256);

impl Compress for HashValue {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
        buf.put_slice(self.0.as_slice());
    }
}

impl Decompress for HashValue {
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 32 {
            return Err(DatabaseError::Decode);
        }
        Ok(Self(B256::from_slice(value)))
    }
}

/// A strict 8-byte big-endian unsigned value (sequence counters, header
/// numbers, stage progress).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct U64Value(pub u64);

impl Compress for U64Value {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
        buf.put_slice(&self.0.to_be_bytes());
    }
}

impl Decompress for U64Value {
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 8 {
            return Err(DatabaseError::Decode);
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(value);
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

/// Wraps any RLP-codable type into a table value; the stored bytes are the
/// canonical RLP encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RlpValue<T>(pub T);

impl<T> From<T> for RlpValue<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> Compress for RlpValue<T>
where
    T: Encodable + Decodable + core::fmt::Debug + Send + Sync + Serialize + DeserializeOwned,
{
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: bytes::BufMut + AsMut<[u8]>>(&self, buf: &mut B) {
        let mut encoded = Vec::with_capacity(self.0.length());
        self.0.encode(&mut encoded);
        buf.put_slice(&encoded);
    }
}

impl<T> Decompress for RlpValue<T>
where
    T: Encodable + Decodable + core::fmt::Debug + Send + Sync + Serialize + DeserializeOwned,
{
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        let mut slice = value;
        let decoded = T::decode(&mut slice).map_err(|_| DatabaseError::Decode)?;
        Ok(Self(decoded))
    }
}

/// The stored form of a block body: transactions live in their own table
/// and the body references them as `[base_txn_id, base_txn_id + txn_count)`.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct StoredBlockBody {
    /// First transaction id of the block.
    pub base_txn_id: u64,
    /// Number of transactions in the block.
    pub txn_count: u64,
    /// Ommer headers, stored inline.
    pub ommers: Vec<BlockHeader>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_value_is_strict_about_width() {
        let encoded = Compress::compress(U64Value(0x0102030405060708));
        assert_eq!(encoded, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(U64Value::decompress(&encoded).unwrap().0, 0x0102030405060708);
        assert!(U64Value::decompress(&encoded[..7]).is_err());
    }

    #[test]
    fn stored_body_roundtrip() {
        let body = StoredBlockBody {
            base_txn_id: 99,
            txn_count: 3,
            ommers: vec![BlockHeader { number: 7, ..Default::default() }],
        };
        let value = RlpValue(body.clone());
        let encoded = Compress::compress(value);
        assert_eq!(RlpValue::<StoredBlockBody>::decompress(&encoded).unwrap().0, body);
    }
}
