//! The execution core's outward face.
//!
//! An external coordinator feeds headers and bodies in, asks for a branch
//! to be verified against its advertised state roots, and acknowledges
//! fork choice to commit the result.

mod canonical;
mod engine;

pub use canonical::CanonicalChain;
pub use engine::{ExecutionEngine, VerificationResult};

use corten_consensus::ValidationError;
use corten_storage::StorageError;
use thiserror::Error;

/// Infrastructure failures of the engine surface.
///
/// Branch-validation failures are not errors: they travel inside
/// [`VerificationResult`]. What ends up here aborts the current write
/// transaction without partial commit.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The storage layer failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The chain names an engine this build cannot run.
    #[error(transparent)]
    Consensus(ValidationError),
}
