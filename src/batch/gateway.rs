//! Chain Gateway Module
//!
//! The scheduler never signs or broadcasts anything itself. It hands each
//! batch to a `ChainGateway` at the batch's scheduled time and records the
//! outcome.

use crate::{error::GatewayError, TransactionBatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Acknowledgement of a submitted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    /// Opaque gateway reference (bundle hash, request id, ...)
    pub reference: String,
    /// Cost actually paid in gwei, when the gateway knows it
    pub realized_cost: Option<f64>,
}

#[async_trait]
pub trait ChainGateway: Send + Sync + 'static {
    async fn submit(&self, batch: &TransactionBatch) -> Result<SubmissionReceipt, GatewayError>;
}

/// Gateway that accepts every batch without sending it anywhere
pub struct DryRunGateway;

#[async_trait]
impl ChainGateway for DryRunGateway {
    async fn submit(&self, batch: &TransactionBatch) -> Result<SubmissionReceipt, GatewayError> {
        info!(
            "Dry run: batch #{} with {} transactions, quoted {:.0} gwei",
            batch.id,
            batch.len(),
            batch.fee_quote.batched_cost
        );
        Ok(SubmissionReceipt {
            reference: format!("dry-run-{}", batch.id),
            realized_cost: None,
        })
    }
}
