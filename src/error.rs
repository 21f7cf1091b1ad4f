//! Error types
//!
//! Nothing here is fatal to the process. Input errors are returned to the
//! caller of `add_transaction`, gateway errors end up as `batch_failed`
//! events, and the predictor only refuses to run before initialization.

use crate::types::{BatchId, BatchStatus, TxId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("transaction {0:?} has no chain id")]
    MissingChainId(TxId),

    #[error("transaction {0:?} is already pooled or batched")]
    DuplicateTransaction(TxId),

    #[error("unknown batch #{0}")]
    UnknownBatch(BatchId),

    #[error("batch #{batch_id} cannot move from {from} to {to}")]
    InvalidTransition {
        batch_id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("scheduler worker is gone")]
    WorkerStopped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredictorError {
    #[error("predictor used before initialize()")]
    NotInitialized,
}

/// Failure reported by a chain gateway
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
