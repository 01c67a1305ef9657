//! Incremental Merkle-Patricia trie maintenance.
//!
//! The [`TrieLoader`] computes the state root over the hashed state,
//! either from scratch or by re-walking only the subtrees reached by a
//! [`PrefixSet`] of changed keys, reusing stored intermediate hashes
//! everywhere else. Freshly produced node records are staged in external
//! [`Collector`]s and loaded into the trie tables in key order once the
//! root has been accepted.

mod changes;
mod etl;
mod loader;
mod node;
mod prefix_set;

pub use changes::{
    gather_account_changes, gather_storage_changes, storage_trie_prefix, HashedAddresses,
    StoragePrefixSets,
};
pub use etl::Collector;
pub use loader::TrieLoader;
pub use node::StoredNode;
pub use prefix_set::PrefixSet;

use corten_primitives::DecodingError;
use corten_storage::StorageError;
use thiserror::Error;

/// Failures of the trie layer.
#[derive(Debug, Error)]
pub enum TrieError {
    /// The storage layer failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The underlying key/value store failed.
    #[error(transparent)]
    Database(#[from] reth_db_api::DatabaseError),
    /// A node record did not decode.
    #[error(transparent)]
    Decoding(#[from] DecodingError),
    /// An ETL spill file could not be written or read.
    #[error("etl i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Unpacks a byte key into one nibble per byte.
pub fn unpack_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for byte in key {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

/// Packs an even-length nibble path back into bytes.
pub fn pack_nibbles(nibbles: &[u8]) -> Vec<u8> {
    debug_assert!(nibbles.len() % 2 == 0);
    nibbles.chunks_exact(2).map(|pair| (pair[0] << 4) | pair[1]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibble_packing_roundtrip() {
        let key = [0xde, 0xad, 0x01];
        let nibbles = unpack_nibbles(&key);
        assert_eq!(nibbles, vec![0xd, 0xe, 0xa, 0xd, 0x0, 0x1]);
        assert_eq!(pack_nibbles(&nibbles), key.to_vec());
    }
}
