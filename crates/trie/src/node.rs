//! Marshalled branch-node records of the trie tables.

use alloy_primitives::B256;
use alloy_trie::nodes::BranchNodeCompact;
use corten_primitives::DecodingError;

const ROOT_FLAG: u8 = 0x01;

/// A stored branch node.
///
/// `state_mask` marks the populated children, `tree_mask` the children
/// that have their own stored record further down, `hash_mask` the
/// children whose hashes are carried in `hashes`. A record at the root of
/// a (sub)trie additionally carries `root_hash`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredNode {
    /// Populated children.
    pub state_mask: u16,
    /// Children with stored subtree records.
    pub tree_mask: u16,
    /// Children whose hashes follow.
    pub hash_mask: u16,
    /// Root hash of the subtree below this record, when known.
    pub root_hash: Option<B256>,
    /// Child hashes, one per set bit of `hash_mask`, ascending.
    pub hashes: Vec<B256>,
}

impl StoredNode {
    /// A record carrying only a subtree root hash.
    pub fn root_only(root_hash: B256) -> Self {
        Self { root_hash: Some(root_hash), ..Default::default() }
    }

    /// The stored hash of child `nibble`, if `hash_mask` covers it.
    pub fn hash_for_nibble(&self, nibble: u8) -> Option<B256> {
        if self.hash_mask & (1 << nibble) == 0 {
            return None;
        }
        let below = self.hash_mask & ((1u16 << nibble) - 1);
        self.hashes.get(below.count_ones() as usize).copied()
    }

    /// Marshals the record: three big-endian masks, a flag byte, the
    /// optional root hash, then the child hashes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 + 32 * (self.hashes.len() + 1));
        out.extend_from_slice(&self.state_mask.to_be_bytes());
        out.extend_from_slice(&self.tree_mask.to_be_bytes());
        out.extend_from_slice(&self.hash_mask.to_be_bytes());
        out.push(if self.root_hash.is_some() { ROOT_FLAG } else { 0 });
        if let Some(root) = &self.root_hash {
            out.extend_from_slice(root.as_slice());
        }
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_slice());
        }
        out
    }

    /// Unmarshals a record, validating mask consistency.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodingError> {
        if payload.len() < 7 {
            return Err(DecodingError::InputTooShort);
        }
        let mask = |i: usize| u16::from_be_bytes([payload[i], payload[i + 1]]);
        let state_mask = mask(0);
        let tree_mask = mask(2);
        let hash_mask = mask(4);
        if tree_mask & !state_mask != 0 || hash_mask & !state_mask != 0 {
            return Err(DecodingError::InvalidMasksSubsets);
        }

        let mut rest = &payload[7..];
        let root_hash = if payload[6] & ROOT_FLAG != 0 {
            if rest.len() < 32 {
                return Err(DecodingError::InputTooShort);
            }
            let root = B256::from_slice(&rest[..32]);
            rest = &rest[32..];
            Some(root)
        } else {
            None
        };

        if rest.len() != hash_mask.count_ones() as usize * 32 {
            return Err(DecodingError::InvalidHashesLength);
        }
        let hashes = rest.chunks_exact(32).map(B256::from_slice).collect();
        Ok(Self { state_mask, tree_mask, hash_mask, root_hash, hashes })
    }
}

impl From<&BranchNodeCompact> for StoredNode {
    fn from(node: &BranchNodeCompact) -> Self {
        Self {
            state_mask: node.state_mask.get(),
            tree_mask: node.tree_mask.get(),
            hash_mask: node.hash_mask.get(),
            root_hash: node.root_hash,
            hashes: node.hashes.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample() -> StoredNode {
        StoredNode {
            state_mask: 0b1011_0000_0000_0101,
            tree_mask: 0b0001_0000_0000_0001,
            hash_mask: 0b1000_0000_0000_0100,
            root_hash: Some(B256::repeat_byte(0x77)),
            hashes: vec![B256::repeat_byte(1), B256::repeat_byte(2)],
        }
    }

    #[rstest]
    #[case(StoredNode::default())]
    #[case(StoredNode::root_only(B256::repeat_byte(7)))]
    #[case(sample())]
    fn roundtrip(#[case] node: StoredNode) {
        assert_eq!(StoredNode::decode(&node.encode()).unwrap(), node);
    }

    #[test]
    fn hash_lookup_counts_set_bits() {
        let node = sample();
        assert_eq!(node.hash_for_nibble(2), Some(B256::repeat_byte(1)));
        assert_eq!(node.hash_for_nibble(15), Some(B256::repeat_byte(2)));
        assert_eq!(node.hash_for_nibble(0), None);
        assert_eq!(node.hash_for_nibble(4), None);
    }

    #[test]
    fn mask_subset_violations_are_rejected() {
        let mut node = StoredNode { state_mask: 0b0001, tree_mask: 0b0010, ..Default::default() };
        assert_eq!(
            StoredNode::decode(&node.encode()),
            Err(DecodingError::InvalidMasksSubsets)
        );
        node.tree_mask = 0;
        node.hash_mask = 0b0100;
        assert_eq!(
            StoredNode::decode(&node.encode()),
            Err(DecodingError::InvalidMasksSubsets)
        );
    }

    #[test]
    fn hash_count_mismatch_is_rejected() {
        let node = StoredNode {
            state_mask: 0b0101,
            hash_mask: 0b0101,
            hashes: vec![B256::repeat_byte(1)],
            ..Default::default()
        };
        assert_eq!(
            StoredNode::decode(&node.encode()),
            Err(DecodingError::InvalidHashesLength)
        );
    }
}
