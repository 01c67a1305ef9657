//! Fixed key encodings of the on-disk format.

use alloy_primitives::{Address, B256};
use reth_db_api::{
    table::{Decode, Encode},
    DatabaseError,
};
use serde::{Deserialize, Serialize};

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;
/// Length of a hash in bytes.
pub const HASH_LENGTH: usize = 32;
/// Length of an incarnation in bytes.
pub const INCARNATION_LENGTH: usize = 8;

/// Block key: `big_endian_u64(number) ‖ hash[32]`, 40 bytes. The 8-byte
/// number prefix alone addresses per-height scans.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockKey {
    /// Block number.
    pub number: u64,
    /// Header hash.
    pub hash: B256,
}

impl BlockKey {
    /// Creates a block key.
    pub const fn new(number: u64, hash: B256) -> Self {
        Self { number, hash }
    }
}

impl Encode for BlockKey {
    type Encoded = [u8; 40];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 40];
        out[..8].copy_from_slice(&self.number.to_be_bytes());
        out[8..].copy_from_slice(self.hash.as_slice());
        out
    }
}

impl Decode for BlockKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 40 {
            return Err(DatabaseError::Decode);
        }
        let mut number = [0u8; 8];
        number.copy_from_slice(&value[..8]);
        Ok(Self { number: u64::from_be_bytes(number), hash: B256::from_slice(&value[8..]) })
    }
}

/// Storage prefix: `address[20] ‖ big_endian_u64(incarnation)`, 28 bytes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StoragePrefix {
    /// Plain account address.
    pub address: Address,
    /// Incarnation of the contract.
    pub incarnation: u64,
}

impl StoragePrefix {
    /// Creates a storage prefix.
    pub const fn new(address: Address, incarnation: u64) -> Self {
        Self { address, incarnation }
    }
}

impl Encode for StoragePrefix {
    type Encoded = [u8; 28];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 28];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..].copy_from_slice(&self.incarnation.to_be_bytes());
        out
    }
}

impl Decode for StoragePrefix {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 28 {
            return Err(DatabaseError::Decode);
        }
        let mut incarnation = [0u8; 8];
        incarnation.copy_from_slice(&value[20..]);
        Ok(Self {
            address: Address::from_slice(&value[..20]),
            incarnation: u64::from_be_bytes(incarnation),
        })
    }
}

/// Account-history key: `address[20] ‖ big_endian_u64(block_number)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountHistoryKey {
    /// Plain account address.
    pub address: Address,
    /// Highest block number covered by the shard.
    pub block_number: u64,
}

impl Encode for AccountHistoryKey {
    type Encoded = [u8; 28];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 28];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..].copy_from_slice(&self.block_number.to_be_bytes());
        out
    }
}

impl Decode for AccountHistoryKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 28 {
            return Err(DatabaseError::Decode);
        }
        let mut number = [0u8; 8];
        number.copy_from_slice(&value[20..]);
        Ok(Self {
            address: Address::from_slice(&value[..20]),
            block_number: u64::from_be_bytes(number),
        })
    }
}

/// Storage-history key: `address[20] ‖ location[32] ‖ big_endian_u64(block)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StorageHistoryKey {
    /// Plain account address.
    pub address: Address,
    /// Storage location.
    pub location: B256,
    /// Highest block number covered by the shard.
    pub block_number: u64,
}

impl Encode for StorageHistoryKey {
    type Encoded = [u8; 60];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 60];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..52].copy_from_slice(self.location.as_slice());
        out[52..].copy_from_slice(&self.block_number.to_be_bytes());
        out
    }
}

impl Decode for StorageHistoryKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 60 {
            return Err(DatabaseError::Decode);
        }
        let mut number = [0u8; 8];
        number.copy_from_slice(&value[52..]);
        Ok(Self {
            address: Address::from_slice(&value[..20]),
            location: B256::from_slice(&value[20..52]),
            block_number: u64::from_be_bytes(number),
        })
    }
}

/// Hashed-storage prefix: `keccak(address)[32] ‖ big_endian_u64(incarnation)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct HashedStoragePrefix {
    /// Keccak-256 of the account address.
    pub hashed_address: B256,
    /// Incarnation of the contract.
    pub incarnation: u64,
}

impl HashedStoragePrefix {
    /// Creates a hashed-storage prefix.
    pub const fn new(hashed_address: B256, incarnation: u64) -> Self {
        Self { hashed_address, incarnation }
    }
}

impl Encode for HashedStoragePrefix {
    type Encoded = [u8; 40];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 40];
        out[..32].copy_from_slice(self.hashed_address.as_slice());
        out[32..].copy_from_slice(&self.incarnation.to_be_bytes());
        out
    }
}

impl Decode for HashedStoragePrefix {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 40 {
            return Err(DatabaseError::Decode);
        }
        let mut incarnation = [0u8; 8];
        incarnation.copy_from_slice(&value[32..]);
        Ok(Self {
            hashed_address: B256::from_slice(&value[..32]),
            incarnation: u64::from_be_bytes(incarnation),
        })
    }
}

/// Storage-change-set key:
/// `big_endian_u64(block) ‖ address[20] ‖ big_endian_u64(incarnation)`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StorageChangeKey {
    /// Block the change belongs to.
    pub block_number: u64,
    /// Changed account.
    pub address: Address,
    /// Incarnation of the changed storage.
    pub incarnation: u64,
}

impl Encode for StorageChangeKey {
    type Encoded = [u8; 36];

    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 36];
        out[..8].copy_from_slice(&self.block_number.to_be_bytes());
        out[8..28].copy_from_slice(self.address.as_slice());
        out[28..].copy_from_slice(&self.incarnation.to_be_bytes());
        out
    }
}

impl Decode for StorageChangeKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 36 {
            return Err(DatabaseError::Decode);
        }
        let mut number = [0u8; 8];
        number.copy_from_slice(&value[..8]);
        let mut incarnation = [0u8; 8];
        incarnation.copy_from_slice(&value[28..]);
        Ok(Self {
            block_number: u64::from_be_bytes(number),
            address: Address::from_slice(&value[8..28]),
            incarnation: u64::from_be_bytes(incarnation),
        })
    }
}

/// A raw, variable-length key. Used where one table mixes key shapes
/// (`PlainState` account and storage rows, trie node paths) or where the
/// key is a well-known name (`DatabaseInfo`, `Sequence`, `SyncStage`).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RawKey(pub Vec<u8>);

impl RawKey {
    /// Key holding a plain account address.
    pub fn from_address(address: Address) -> Self {
        Self(address.as_slice().to_vec())
    }

    /// Key holding an `address ‖ incarnation` storage prefix.
    pub fn from_storage_prefix(prefix: StoragePrefix) -> Self {
        Self(prefix.encode().to_vec())
    }

    /// Key holding a well-known name.
    pub fn from_name(name: &str) -> Self {
        Self(name.as_bytes().to_vec())
    }
}

impl From<&[u8]> for RawKey {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl Encode for RawKey {
    type Encoded = Vec<u8>;

    fn encode(self) -> Self::Encoded {
        self.0
    }
}

impl Decode for RawKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        Ok(Self(value.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn block_key_layout() {
        let key = BlockKey::new(
            0x0102030405060708,
            b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
        );
        let encoded = key.encode();
        assert_eq!(&encoded[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(encoded[39], 0xaa);
        assert_eq!(BlockKey::decode(&encoded).unwrap(), key);
        assert!(BlockKey::decode(&encoded[..39]).is_err());
    }

    #[test]
    fn key_order_matches_byte_order() {
        let lo = BlockKey::new(1, B256::repeat_byte(0xff));
        let hi = BlockKey::new(2, B256::ZERO);
        assert!(lo < hi);
        assert!(lo.encode().as_slice() < hi.encode().as_slice());

        let lo = StorageChangeKey { block_number: 5, address: Address::ZERO, incarnation: 9 };
        let hi = StorageChangeKey { block_number: 5, address: Address::repeat_byte(1), incarnation: 0 };
        assert!(lo < hi);
        assert!(lo.encode().as_slice() < hi.encode().as_slice());
    }

    #[test]
    fn storage_prefix_roundtrip() {
        let prefix = StoragePrefix::new(Address::repeat_byte(0xab), 3);
        assert_eq!(StoragePrefix::decode(&prefix.encode()).unwrap(), prefix);
    }

    #[test]
    fn history_keys_roundtrip() {
        let account = AccountHistoryKey { address: Address::repeat_byte(2), block_number: 77 };
        assert_eq!(AccountHistoryKey::decode(&account.encode()).unwrap(), account);

        let storage = StorageHistoryKey {
            address: Address::repeat_byte(3),
            location: B256::repeat_byte(4),
            block_number: 12,
        };
        assert_eq!(StorageHistoryKey::decode(&storage.encode()).unwrap(), storage);
    }
}
