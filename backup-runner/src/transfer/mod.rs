//! Chunk transfer via the external sync tool.

pub mod retry;
pub mod worker;

pub use retry::RetryPolicy;
pub use worker::{ChunkOutcome, TransferWorker};
