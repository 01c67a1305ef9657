//! The staged pipeline and its stages.
//!
//! Each stage is a deterministic function over the exclusive write
//! transaction with a persisted progress block number; the pipeline runs
//! them in order, stops at the first non-success and surfaces the failing
//! stage's unwind point and bad-block hash.

mod execution;
mod hashstate;
mod headers;
mod interhashes;
mod pipeline;
mod senders;
mod stage;

pub use execution::{
    DbBlockState, DbStateReader, Evm, ExecutionOutcome, ExecutionProcessor, ExecutionStage,
    IntraBlockState, StateReader, TransferEvm,
};
pub use hashstate::HashStateStage;
pub use headers::HeadersStage;
pub use interhashes::InterHashesStage;
pub use pipeline::Pipeline;
pub use senders::SendersStage;
pub use stage::{Stage, StageError, StageId, StageOutcome, SyncContext};
