//! Batching Strategies Module
//!
//! Each strategy looks at the whole pending set and answers two questions:
//! how well it would batch this set (`score`) and how it would split it
//! (`partition`). The scheduler runs all four every cycle and keeps only the
//! winner's partition.
//!
//! # Strategies
//! - **ChainPriority**: one group per `(chain_id, priority)`
//! - **TransactionType**: one group per transaction kind
//! - **FeeSimilarity**: one group per priority tier (a proxy for the fee it needs)
//! - **MixedPairwise**: greedy clustering of pairwise-similar transactions

use crate::config::PriorityWeights;
use crate::types::{PendingTransaction, TxId};
use std::collections::BTreeMap;

/// Minimum similarity for two transactions to share a mixed group
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Settings every strategy may need
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext {
    pub weights: PriorityWeights,
    /// Upper bound on mixed-pairwise group size
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchingStrategy {
    ChainPriority,
    TransactionType,
    FeeSimilarity,
    MixedPairwise,
}

/// The strategy picked for a cycle, with its score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategySelection {
    pub strategy: BatchingStrategy,
    pub score: f64,
}

impl BatchingStrategy {
    /// Evaluation order; earlier entries win ties
    pub const ALL: [BatchingStrategy; 4] = [
        BatchingStrategy::ChainPriority,
        BatchingStrategy::TransactionType,
        BatchingStrategy::FeeSimilarity,
        BatchingStrategy::MixedPairwise,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BatchingStrategy::ChainPriority => "chain_priority",
            BatchingStrategy::TransactionType => "transaction_type",
            BatchingStrategy::FeeSimilarity => "fee_similarity",
            BatchingStrategy::MixedPairwise => "mixed_pairwise",
        }
    }

    /// Fitness of this strategy for the pending set (higher is better)
    ///
    /// An empty set scores 0 for every strategy.
    pub fn score(&self, pending: &[&PendingTransaction], ctx: &StrategyContext) -> f64 {
        if pending.is_empty() {
            return 0.0;
        }

        match self {
            BatchingStrategy::ChainPriority => {
                let sizes: Vec<f64> = group_by(pending, |tx| (tx.chain_id, tx.priority))
                    .values()
                    .map(|group| group.len() as f64)
                    .collect();
                mean(&sizes) * 10.0 - variance(&sizes)
            }
            BatchingStrategy::TransactionType => {
                let largest = group_by(pending, |tx| tx.kind)
                    .values()
                    .map(Vec::len)
                    .max()
                    .unwrap_or(0);
                largest as f64 / pending.len() as f64 * 100.0
            }
            BatchingStrategy::FeeSimilarity => {
                let weights: Vec<f64> = pending
                    .iter()
                    .map(|tx| ctx.weights.weight(tx.priority))
                    .collect();
                50.0 - variance(&weights) * 100.0
            }
            BatchingStrategy::MixedPairwise => {
                0.4 * BatchingStrategy::ChainPriority.score(pending, ctx)
                    + 0.3 * BatchingStrategy::TransactionType.score(pending, ctx)
                    + 0.3 * BatchingStrategy::FeeSimilarity.score(pending, ctx)
            }
        }
    }

    /// Split the pending set into groups of transaction ids
    ///
    /// Every pending id lands in exactly one group, and each group keeps
    /// the arrival order of `pending`.
    pub fn partition(&self, pending: &[&PendingTransaction], ctx: &StrategyContext) -> Vec<Vec<TxId>> {
        match self {
            BatchingStrategy::ChainPriority => {
                group_by(pending, |tx| (tx.chain_id, tx.priority)).into_values().collect()
            }
            BatchingStrategy::TransactionType => group_by(pending, |tx| tx.kind).into_values().collect(),
            BatchingStrategy::FeeSimilarity => group_by(pending, |tx| tx.priority).into_values().collect(),
            BatchingStrategy::MixedPairwise => cluster_similar(pending, ctx.max_batch_size.max(1)),
        }
    }
}

/// Score every strategy over the pending set and return the best one
///
/// `None` when there is nothing to batch.
pub fn select_strategy(pending: &[&PendingTransaction], ctx: &StrategyContext) -> Option<StrategySelection> {
    if pending.is_empty() {
        return None;
    }

    BatchingStrategy::ALL
        .iter()
        .map(|strategy| StrategySelection {
            strategy: *strategy,
            score: strategy.score(pending, ctx),
        })
        .fold(None, |best: Option<StrategySelection>, candidate| match best {
            Some(b) if b.score >= candidate.score => Some(b),
            _ => Some(candidate),
        })
}

/// Weighted match on chain (0.4), priority (0.3) and kind (0.3)
pub fn similarity(a: &PendingTransaction, b: &PendingTransaction) -> f64 {
    // Tenths, so the threshold comparison is exact
    let mut points = 0u32;
    if a.chain_id == b.chain_id {
        points += 4;
    }
    if a.priority == b.priority {
        points += 3;
    }
    if a.kind == b.kind {
        points += 3;
    }
    f64::from(points) / 10.0
}

fn cluster_similar(pending: &[&PendingTransaction], max_group: usize) -> Vec<Vec<TxId>> {
    let mut clustered = vec![false; pending.len()];
    let mut groups = Vec::new();

    for (i, seed) in pending.iter().enumerate() {
        if clustered[i] {
            continue;
        }
        clustered[i] = true;
        let mut group = vec![seed.id];

        for (j, candidate) in pending.iter().enumerate().skip(i + 1) {
            if group.len() >= max_group {
                break;
            }
            if !clustered[j] && similarity(seed, candidate) >= SIMILARITY_THRESHOLD {
                clustered[j] = true;
                group.push(candidate.id);
            }
        }

        groups.push(group);
    }

    groups
}

fn group_by<K, F>(pending: &[&PendingTransaction], key: F) -> BTreeMap<K, Vec<TxId>>
where
    K: Ord,
    F: Fn(&PendingTransaction) -> K,
{
    let mut groups: BTreeMap<K, Vec<TxId>> = BTreeMap::new();
    for tx in pending {
        groups.entry(key(tx)).or_default().push(tx.id);
    }
    groups
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}
