//! Outcome events for the orchestrating layer

use crate::types::{BatchId, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialised as `{"event": "batch_executed", ...}` / `{"event": "batch_failed", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchExecuted {
        batch_id: BatchId,
        transaction_ids: Vec<TxId>,
        /// Realised savings in gwei
        savings: f64,
        execution_time: DateTime<Utc>,
    },
    BatchFailed {
        batch_id: BatchId,
        reason: String,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchEvent::BatchExecuted { batch_id, .. } | BatchEvent::BatchFailed { batch_id, .. } => *batch_id,
        }
    }
}
