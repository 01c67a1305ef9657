//! Canonical-chain tracking: the `(height, hash)` head, fork-point
//! location and rewriting of the canonical-hash table.

use crate::EngineError;
use alloy_primitives::B256;
use corten_primitives::BlockId;
use corten_storage::{ChainProvider, RwTx};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

const CANONICAL_CACHE_SIZE: usize = 1_000;

pub(crate) fn ensure_invariant(condition: bool, message: &str) {
    if !condition {
        // invariant violations indicate storage corruption and are the
        // only admissible panics
        panic!("execution invariant violation: {message}");
    }
}

/// Tracks the canonical head and rewrites the canonical-hash table as
/// fork choice moves, with a small cache over recent height lookups.
///
/// After any operation, every height up to the current head maps to
/// exactly one canonical hash and chains by parent back to genesis.
#[derive(Debug)]
pub struct CanonicalChain {
    initial_head: BlockId,
    current_head: BlockId,
    cache: LruCache<u64, B256>,
}

impl CanonicalChain {
    /// Reads the canonical head and starts tracking from it.
    pub fn new(tx: &RwTx) -> Result<Self, EngineError> {
        let (number, hash) = ChainProvider::new(tx).read_canonical_head()?;
        let head = BlockId { number, hash };
        Ok(Self {
            initial_head: head,
            current_head: head,
            cache: LruCache::new(
                NonZeroUsize::new(CANONICAL_CACHE_SIZE).expect("nonzero cache size"),
            ),
        })
    }

    /// The head at construction time.
    pub fn initial_head(&self) -> BlockId {
        self.initial_head
    }

    /// The current head.
    pub fn current_head(&self) -> BlockId {
        self.current_head
    }

    /// The canonical hash at a height.
    pub fn get_hash(&self, tx: &RwTx, height: u64) -> Result<Option<B256>, EngineError> {
        Ok(ChainProvider::new(tx).read_canonical_hash(height)?)
    }

    fn canonical_hash_cached(
        &mut self,
        tx: &RwTx,
        height: u64,
    ) -> Result<Option<B256>, EngineError> {
        if let Some(hash) = self.cache.get(&height) {
            return Ok(Some(*hash));
        }
        Ok(ChainProvider::new(tx).read_canonical_hash(height)?)
    }

    /// The number of the highest ancestor of `header_hash` that is on the
    /// canonical chain. The header must already be in the header table.
    pub fn find_forking_point(
        &mut self,
        tx: &RwTx,
        header_hash: B256,
    ) -> Result<u64, EngineError> {
        let chain = ChainProvider::new(tx);
        let header = chain.read_header_by_hash(header_hash)?;
        ensure_invariant(header.is_some(), "find_forking_point requires a known header");
        let header = header.expect("checked above");
        if header.number == 0 {
            return Ok(0);
        }

        let height = header.number;
        let prev_canonical = self.canonical_hash_cached(tx, height - 1)?;
        if prev_canonical == Some(header.parent_hash) {
            // the common case: the new header extends the canonical head
            return Ok(height - 1);
        }

        ensure_invariant(height >= 2, "genesis parent is not canonical");
        let parent = chain.read_header(height - 1, header.parent_hash)?;
        ensure_invariant(parent.is_some(), "forking-point walk lost the parent header");
        let mut ancestor_hash = parent.expect("checked above").parent_hash;
        let mut ancestor_height = height - 2;

        loop {
            if self.canonical_hash_cached(tx, ancestor_height)? == Some(ancestor_hash) {
                return Ok(ancestor_height);
            }
            ensure_invariant(
                ancestor_height > 0,
                "forking-point walk descended past genesis",
            );
            let ancestor = chain.read_header(ancestor_height, ancestor_hash)?;
            ensure_invariant(ancestor.is_some(), "forking-point walk lost an ancestor header");
            ancestor_hash = ancestor.expect("checked above").parent_hash;
            ancestor_height -= 1;
        }
    }

    /// Rewrites canonical hashes from `(height, hash)` downward, climbing
    /// parent links until the persisted mapping already agrees.
    pub fn update_up_to(&mut self, tx: &RwTx, height: u64, hash: B256) -> Result<(), EngineError> {
        if height == 0 {
            return Ok(());
        }
        let chain = ChainProvider::new(tx);
        let mut ancestor_hash = hash;
        let mut ancestor_height = height;

        loop {
            let persisted = chain.read_canonical_hash(ancestor_height)?;
            if persisted == Some(ancestor_hash) {
                break;
            }
            chain.write_canonical_hash(ancestor_height, ancestor_hash)?;
            self.cache.put(ancestor_height, ancestor_hash);

            let ancestor = chain.read_header(ancestor_height, ancestor_hash)?;
            ensure_invariant(
                ancestor.is_some(),
                "canonical rewrite lost an ancestor header",
            );
            ancestor_hash = ancestor.expect("checked above").parent_hash;
            ensure_invariant(ancestor_height > 0, "canonical rewrite descended past genesis");
            ancestor_height -= 1;
        }

        debug!(target: "engine", height, %hash, "canonical chain updated");
        self.current_head = BlockId { number: height, hash };
        Ok(())
    }

    /// Removes canonical hashes strictly above `unwind_point`; the head
    /// becomes the canonical block at `unwind_point`, which must exist.
    pub fn delete_down_to(&mut self, tx: &RwTx, unwind_point: u64) -> Result<(), EngineError> {
        let chain = ChainProvider::new(tx);
        for height in (unwind_point + 1..=self.current_head.number).rev() {
            chain.delete_canonical_hash(height)?;
            self.cache.pop(&height);
        }

        let head_hash = chain.read_canonical_hash(unwind_point)?;
        ensure_invariant(head_hash.is_some(), "no canonical hash at the unwind point");
        self.current_head =
            BlockId { number: unwind_point, hash: head_hash.expect("checked above") };
        Ok(())
    }
}
