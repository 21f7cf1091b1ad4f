use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a pending transaction
pub type TxId = H256;

/// Sequential batch identifier (first batch is 1)
pub type BatchId = u64;

/// Target chain identifier. `0` means the caller never set one.
pub type ChainId = u64;

/// What a pending transaction does on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deployment,
    Withdrawal,
    Rebalance,
    Harvest,
    Compound,
    Approval,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Deployment => "deployment",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Rebalance => "rebalance",
            TransactionKind::Harvest => "harvest",
            TransactionKind::Compound => "compound",
            TransactionKind::Approval => "approval",
        };
        f.write_str(name)
    }
}

/// Urgency tier of a transaction
///
/// Ordered from most to least urgent, so `Priority::Critical < Priority::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// Transaction waiting to be batched
///
/// Immutable once created. The pool owns it until a batch takes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: TxId,
    pub kind: TransactionKind,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: ChainId,
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
}

impl PendingTransaction {
    /// Derive an id from the transaction contents
    ///
    /// For callers that do not carry their own identifiers. Two transactions
    /// with identical contents hash to the same id and the second one is
    /// rejected as a duplicate.
    pub fn compute_id(&self) -> TxId {
        let mut data = Vec::with_capacity(96 + self.data.len());
        data.extend_from_slice(self.from.as_bytes());
        data.extend_from_slice(self.to.as_bytes());

        let mut value_bytes = [0u8; 32];
        self.value.to_big_endian(&mut value_bytes);
        data.extend_from_slice(&value_bytes);

        data.extend_from_slice(&self.data);
        data.extend_from_slice(&self.chain_id.to_be_bytes());
        data.push(self.kind as u8);
        data.push(self.priority as u8);
        if let Some(deadline) = self.deadline {
            data.extend_from_slice(&deadline.timestamp_millis().to_be_bytes());
        }

        H256::from_slice(&keccak256(data))
    }

    pub fn is_critical(&self) -> bool {
        self.priority == Priority::Critical
    }
}

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Scheduled,
    Executing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::Scheduled)
                | (BatchStatus::Scheduled, BatchStatus::Executing)
                | (BatchStatus::Executing, BatchStatus::Completed)
                | (BatchStatus::Executing, BatchStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Scheduled => "scheduled",
            BatchStatus::Executing => "executing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Estimated fee for submitting a group, batched and unbatched
///
/// Fees are in gwei per gas unit, costs in gwei.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub gas_units: u64,
    pub base_fee: f64,
    pub priority_fee: f64,
    pub unbatched_cost: f64,
    pub batched_cost: f64,
}

impl FeeQuote {
    pub fn fee_rate(&self) -> f64 {
        self.base_fee + self.priority_fee
    }
}

/// Group of transactions submitted together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub id: BatchId,
    pub transactions: Vec<PendingTransaction>,
    pub fee_quote: FeeQuote,
    pub scheduled_time: DateTime<Utc>,
    pub status: BatchStatus,
    /// Unbatched cost minus batched cost, in gwei
    pub savings: f64,
    /// Name of the strategy that formed the batch
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

impl TransactionBatch {
    pub fn transaction_ids(&self) -> Vec<TxId> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
