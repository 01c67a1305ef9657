//! Consensus engines and pre-execution validation.
//!
//! Engines form a closed set, `{NoProof, Ethash, Clique, ProofOfStake}`
//! plus the merge composite, held by value and dispatched by `match`.
//! Validation failures are values that flow to the caller; only storage
//! corruption is allowed to escalate further up.

mod base;
mod difficulty;
mod engine;
mod error;
mod state;
mod validation;

pub use base::{block_reward, EngineBase, SealVariant};
pub use difficulty::canonical_difficulty;
pub use engine::{engine_factory, ConsensusEngine, MergeEngine};
pub use error::{ValidationError, ValidationResult};
pub use state::{BlockState, RewardState};
pub use validation::{
    expected_base_fee_per_gas, intrinsic_gas, pre_validate_transaction, ELASTICITY_MULTIPLIER,
    MAX_INIT_CODE_SIZE, MIN_GAS_LIMIT,
};
