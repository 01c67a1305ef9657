//! The execution engine: block ingest, fork-choice driven verification
//! and commit acknowledgement.

use crate::{
    canonical::{ensure_invariant, CanonicalChain},
    EngineError,
};
use alloy_primitives::{B256, U256};
use corten_chainspec::ChainConfig;
use corten_consensus::engine_factory;
use corten_primitives::{Block, BlockBody, BlockHeader, BlockId, ChainHead};
use corten_stages::{Evm, Pipeline, StageOutcome};
use corten_storage::{ChainProvider, Store, StoreTx};
use std::collections::BTreeSet;
use std::sync::{atomic::AtomicBool, Arc};
use tracing::{debug, info, trace};

/// Outcome of [`ExecutionEngine::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// The branch verified; the canonical head is at `number`.
    ValidChain {
        /// Verified head height.
        number: u64,
    },
    /// The branch failed; the store was left at the unwind point.
    InvalidChain {
        /// Height verification fell back to.
        unwind_point: u64,
        /// Canonical hash at the unwind point.
        unwind_head: B256,
        /// The block that broke the branch, when a stage named one.
        bad_block: Option<B256>,
        /// Canonical hashes above the unwind point at failure time.
        bad_headers: BTreeSet<B256>,
    },
    /// Verification could not complete for a non-branch reason.
    ValidationError {
        /// Height the pipeline stopped at.
        number: u64,
    },
}

/// Orchestrates ingest, verification and fork-choice commit over one
/// exclusive write transaction.
///
/// During first sync the engine commits after each stage; afterwards it
/// defers every commit until [`Self::notify_fork_choice_update`].
#[derive(Debug)]
pub struct ExecutionEngine<'db> {
    txn: StoreTx<'db>,
    pipeline: Pipeline,
    canonical: CanonicalChain,
    status: VerificationResult,
    last_fork_choice: BlockId,
    is_first_sync: bool,
}

impl<'db> ExecutionEngine<'db> {
    /// Opens the engine over an initialized store.
    pub fn new<E: Evm + 'static>(
        store: &'db Store,
        config: ChainConfig,
        evm: E,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, EngineError> {
        let consensus = engine_factory(&config).map_err(EngineError::Consensus)?;
        let txn = store.begin_rw()?;
        let canonical = CanonicalChain::new(txn.tx())?;
        let pipeline = Pipeline::new(config, consensus, evm, stop);
        let last_fork_choice = canonical.current_head();
        Ok(Self {
            txn,
            pipeline,
            canonical,
            status: VerificationResult::ValidChain { number: 0 },
            last_fork_choice,
            is_first_sync: true,
        })
    }

    /// The verification status of the current canonical branch.
    pub fn current_status(&self) -> &VerificationResult {
        &self.status
    }

    /// The last acknowledged fork choice.
    pub fn last_fork_choice(&self) -> BlockId {
        self.last_fork_choice
    }

    /// Writes a header; idempotent.
    pub fn insert_header(&mut self, header: &BlockHeader) -> Result<B256, EngineError> {
        Ok(ChainProvider::new(self.txn.tx()).write_header(header)?)
    }

    /// Writes a block body; idempotent (an existing body is left alone so
    /// its transaction ids stay stable).
    pub fn insert_body(&mut self, block: &Block) -> Result<(), EngineError> {
        let hash = block.header.hash();
        let number = block.header.number;
        let chain = ChainProvider::new(self.txn.tx());
        if !chain.has_body(number, hash)? {
            chain.write_body(number, hash, &block.body)?;
        }
        Ok(())
    }

    /// Writes header and body.
    pub fn insert_block(&mut self, block: &Block) -> Result<(), EngineError> {
        self.insert_header(&block.header)?;
        self.insert_body(block)
    }

    /// Verifies the branch ending at `head_hash`: locates the fork point,
    /// unwinds past it when necessary, rewrites the canonical mapping and
    /// runs the pipeline forward to the head.
    pub fn verify_chain(&mut self, head_hash: B256) -> Result<VerificationResult, EngineError> {
        trace!(target: "engine", %head_hash, "verifying chain");

        let header = self.get_header_by_hash(head_hash)?;
        ensure_invariant(header.is_some(), "header to verify is not present");
        let header = header.expect("checked above");

        let commit_at_each_stage = self.is_first_sync;
        if !commit_at_each_stage {
            self.txn.disable_commit();
        }

        let forking_point = self.canonical.find_forking_point(self.txn.tx(), head_hash)?;
        if forking_point < self.canonical.current_head().number {
            // the branch forks below the head: unwind to change canonical
            let unwind_outcome = self.pipeline.unwind(&mut self.txn, forking_point);
            ensure_invariant(unwind_outcome.is_success(), "unwind must complete with success");
            self.canonical.delete_down_to(self.txn.tx(), forking_point)?;
        }
        self.canonical.update_up_to(self.txn.tx(), header.number, head_hash)?;

        let forward_outcome = self.pipeline.forward(&mut self.txn, header.number);

        let result = match forward_outcome {
            StageOutcome::Success => {
                ensure_invariant(
                    self.pipeline.head_header_number() == self.canonical.current_head().number
                        && self.pipeline.head_header_hash() == self.canonical.current_head().hash,
                    "pipeline head is not aligned with the canonical head",
                );
                VerificationResult::ValidChain { number: self.pipeline.head_header_number() }
            }
            StageOutcome::WrongFork
            | StageOutcome::InvalidBlock
            | StageOutcome::WrongStateRoot => {
                let unwind_point = self.pipeline.unwind_point();
                ensure_invariant(
                    unwind_point.is_some(),
                    "failed forward must provide an unwind point",
                );
                let unwind_point = unwind_point.expect("checked above");
                let unwind_head = self.canonical.get_hash(self.txn.tx(), unwind_point)?;
                ensure_invariant(unwind_head.is_some(), "no canonical hash at the unwind point");

                let bad_block = self.pipeline.bad_block();
                let bad_headers = if bad_block.is_some() {
                    self.collect_bad_headers(unwind_point)?
                } else {
                    BTreeSet::new()
                };
                VerificationResult::InvalidChain {
                    unwind_point,
                    unwind_head: unwind_head.expect("checked above"),
                    bad_block,
                    bad_headers,
                }
            }
            StageOutcome::StoppedByEnv => {
                VerificationResult::ValidChain { number: self.pipeline.head_header_number() }
            }
            _ => VerificationResult::ValidationError {
                number: self.pipeline.head_header_number(),
            },
        };

        self.status = result.clone();
        self.txn.enable_commit();
        if commit_at_each_stage {
            self.txn.commit_and_renew()?;
        }
        Ok(result)
    }

    /// Canonical hashes in `(unwind_point, current_head]`: the headers a
    /// caller should treat as bad alongside the named block.
    fn collect_bad_headers(&mut self, unwind_point: u64) -> Result<BTreeSet<B256>, EngineError> {
        let mut bad_headers = BTreeSet::new();
        for height in unwind_point + 1..=self.canonical.current_head().number {
            if let Some(hash) = self.canonical.get_hash(self.txn.tx(), height)? {
                bad_headers.insert(hash);
            }
        }
        Ok(bad_headers)
    }

    /// Acknowledges fork choice: verifies `head_hash` if it is not the
    /// current head already, then commits and records the choice.
    pub fn notify_fork_choice_update(&mut self, head_hash: B256) -> Result<bool, EngineError> {
        if self.canonical.current_head().hash != head_hash {
            // fork choice usually follows a verify_chain of the same head;
            // after an InvalidChain it names an earlier valid block
            let verification = self.verify_chain(head_hash)?;
            if !matches!(verification, VerificationResult::ValidChain { .. }) {
                return Ok(false);
            }
            ensure_invariant(
                self.canonical.current_head().hash == head_hash,
                "canonical head not aligned with fork choice",
            );
        }

        self.txn.commit_and_renew()?;
        self.last_fork_choice = self.canonical.current_head();
        self.is_first_sync = false;
        info!(
            target: "engine",
            number = self.last_fork_choice.number,
            hash = %self.last_fork_choice.hash,
            "fork choice updated"
        );
        Ok(true)
    }

    /// Reads a header by hash.
    pub fn get_header_by_hash(&self, hash: B256) -> Result<Option<BlockHeader>, EngineError> {
        Ok(ChainProvider::new(self.txn.tx()).read_header_by_hash(hash)?)
    }

    /// Reads a header by `(number, hash)`.
    pub fn get_header(
        &self,
        number: u64,
        hash: B256,
    ) -> Result<Option<BlockHeader>, EngineError> {
        Ok(ChainProvider::new(self.txn.tx()).read_header(number, hash)?)
    }

    /// Reads the canonical hash at a height.
    pub fn get_canonical_hash(&self, height: u64) -> Result<Option<B256>, EngineError> {
        Ok(ChainProvider::new(self.txn.tx()).read_canonical_hash(height)?)
    }

    /// Reads the total difficulty of a block.
    pub fn get_header_td(&self, number: u64, hash: B256) -> Result<Option<U256>, EngineError> {
        Ok(ChainProvider::new(self.txn.tx()).read_total_difficulty(number, hash)?)
    }

    /// Reads a block body by header hash.
    pub fn get_body(&self, hash: B256) -> Result<Option<BlockBody>, EngineError> {
        let chain = ChainProvider::new(self.txn.tx());
        let Some(number) = chain.read_block_number(hash)? else {
            return Ok(None);
        };
        Ok(chain.read_body(number, hash)?)
    }

    /// Highest block number present in the header table.
    pub fn get_block_progress(&self) -> Result<u64, EngineError> {
        Ok(ChainProvider::new(self.txn.tx()).read_block_progress()?)
    }

    /// The canonical head with its total difficulty.
    pub fn get_canonical_head(&self) -> Result<ChainHead, EngineError> {
        let chain = ChainProvider::new(self.txn.tx());
        let (number, hash) = chain.read_canonical_head()?;
        let total_difficulty = chain.read_total_difficulty(number, hash)?;
        ensure_invariant(
            total_difficulty.is_some(),
            "total difficulty of the canonical head is not present",
        );
        Ok(ChainHead {
            number,
            hash,
            total_difficulty: total_difficulty.expect("checked above"),
        })
    }

    /// The most recent headers, highest first.
    pub fn get_last_headers(&self, limit: usize) -> Result<Vec<BlockHeader>, EngineError> {
        let mut headers = Vec::with_capacity(limit);
        ChainProvider::new(self.txn.tx())
            .read_headers_in_reverse_order(limit, |header| headers.push(header))?;
        Ok(headers)
    }

    /// Whether `(number, hash)` descends from the last fork choice.
    pub fn extends_last_fork_choice(
        &self,
        mut number: u64,
        mut hash: B256,
    ) -> Result<bool, EngineError> {
        while number > self.last_fork_choice.number {
            let Some(header) = self.get_header(number, hash)? else {
                return Ok(false);
            };
            if header.parent_hash == self.last_fork_choice.hash {
                return Ok(true);
            }
            number -= 1;
            hash = header.parent_hash;
        }
        Ok(number == self.last_fork_choice.number && hash == self.last_fork_choice.hash)
    }

    /// The number of the highest canonical ancestor of `header_hash`.
    pub fn find_forking_point(&mut self, header_hash: B256) -> Result<u64, EngineError> {
        self.canonical.find_forking_point(self.txn.tx(), header_hash)
    }

    /// The current canonical head as tracked by the engine.
    pub fn canonical_head(&self) -> BlockId {
        self.canonical.current_head()
    }

    /// Aborts the write transaction, discarding uncommitted work.
    pub fn close(self) {
        debug!(target: "engine", "closing execution engine");
        self.txn.abort();
    }
}
