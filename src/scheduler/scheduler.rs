//! Batch Scheduler Module
//!
//! The single-writer core of the batcher. It owns the pending pool and every
//! live batch, and it is the only place a batch changes state.
//!
//! # Lifecycle
//! `Pending -> Scheduled -> Executing -> Completed | Failed`
//!
//! Critical transactions skip the pool and the strategies: they become a
//! one-transaction batch that is already `Scheduled`. When a batch fails its
//! transactions go back to the pool and are re-batched by a later cycle.

use crate::{
    batch::{
        engine::{BatchEngine, FeeSource, millis},
        gateway::SubmissionReceipt,
        trigger,
    },
    config::SchedulerConfig,
    error::{SchedulerError, SchedulerResult},
    events::BatchEvent,
    pool::TransactionPool,
    predictor::PredictionResult,
    strategy::{StrategyContext, select_strategy},
    BatchId, BatchStatus, ChainId, PendingTransaction, TransactionBatch, TxId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Strategy name recorded on fast-lane batches
pub const FAST_LANE: &str = "critical_fast_lane";

/// Result of `add_transaction`
#[derive(Debug, Clone)]
pub enum AddOutcome {
    /// Waiting in the pool; `cycle_due` once the pool reached `max_batch_size`
    Pooled { cycle_due: bool },
    /// Critical transaction, batched on its own
    FastLane(TransactionBatch),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub pool_size: usize,
    pub pending_batches: usize,
    pub scheduled_batches: usize,
    pub executing_batches: usize,
    pub completed_batches: u64,
    pub failed_batches: u64,
    pub requeued_transactions: u64,
    /// Sum of realised savings over completed batches, in gwei
    pub total_savings: f64,
}

pub struct BatchScheduler {
    config: SchedulerConfig,
    confidence_threshold: f64,
    pool: TransactionPool,
    engine: BatchEngine,
    batches: HashMap<BatchId, TransactionBatch>,
    /// Ids held by batches that have not completed or failed
    in_flight: HashSet<TxId>,
    /// Terminal batches with the time they finished, oldest first
    retired: VecDeque<(DateTime<Utc>, BatchId)>,
    prediction: Option<PredictionResult>,
    completed_batches: u64,
    failed_batches: u64,
    requeued_transactions: u64,
    total_savings: f64,
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig, confidence_threshold: f64) -> Self {
        Self {
            engine: BatchEngine::new(config.clone()),
            config,
            confidence_threshold,
            pool: TransactionPool::new(),
            batches: HashMap::new(),
            in_flight: HashSet::new(),
            retired: VecDeque::new(),
            prediction: None,
            completed_batches: 0,
            failed_batches: 0,
            requeued_transactions: 0,
            total_savings: 0.0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn batch(&self, id: BatchId) -> Option<&TransactionBatch> {
        self.batches.get(&id)
    }

    pub fn executing_count(&self) -> usize {
        self.count_with_status(BatchStatus::Executing)
    }

    pub fn update_prediction(&mut self, prediction: PredictionResult) {
        self.prediction = Some(prediction);
    }

    /// Admit a transaction
    ///
    /// Transactions without a chain id, or whose id is already pooled or in
    /// a live batch, are rejected and never reach the pool.
    pub fn add_transaction(&mut self, tx: PendingTransaction, now: DateTime<Utc>) -> SchedulerResult<AddOutcome> {
        if tx.chain_id == 0 {
            warn!("Rejected transaction {:?}: missing chain id", tx.id);
            return Err(SchedulerError::MissingChainId(tx.id));
        }
        if self.pool.contains(&tx.id) || self.in_flight.contains(&tx.id) {
            warn!("Rejected transaction {:?}: duplicate id", tx.id);
            return Err(SchedulerError::DuplicateTransaction(tx.id));
        }

        if tx.is_critical() {
            let plan = self.engine.fast_lane_plan(&tx, now, self.fee_source());
            let batch = self
                .engine
                .create_batch(vec![tx], plan, BatchStatus::Scheduled, FAST_LANE, now);
            info!("Critical transaction fast-laned into batch #{}", batch.id);
            self.track(batch.clone());
            return Ok(AddOutcome::FastLane(batch));
        }

        debug!("Pooled {} transaction {:?} ({} priority)", tx.kind, tx.id, tx.priority);
        self.pool.add(tx);
        Ok(AddOutcome::Pooled {
            cycle_due: trigger::size_due(self.pool.len(), self.config.max_batch_size),
        })
    }

    /// Run one scheduling cycle over the whole pool
    ///
    /// Every group of at least `min_batch_size` transactions that saves at
    /// least `min_savings_gas` becomes a `Pending` batch; everything else
    /// stays pooled. An empty pool is a no-op.
    pub fn create_optimal_batches(&mut self, now: DateTime<Utc>) -> Vec<TransactionBatch> {
        let ctx = StrategyContext {
            weights: self.config.priority_weights,
            max_batch_size: self.config.max_batch_size,
        };

        let (selection, groups) = {
            let pending = self.pool.pending();
            let Some(selection) = select_strategy(&pending, &ctx) else {
                debug!("Scheduling cycle skipped: pool is empty");
                return Vec::new();
            };
            (selection, selection.strategy.partition(&pending, &ctx))
        };
        debug!(
            "Strategy {} selected with score {:.2} over {} transactions",
            selection.strategy.name(),
            selection.score,
            self.pool.len()
        );

        let mut created = Vec::new();
        for group in self.split_groups(groups) {
            if group.len() < self.config.min_batch_size {
                continue;
            }

            let members: Vec<&PendingTransaction> = group.iter().filter_map(|id| self.pool.get(id)).collect();
            let fees = FeeSource {
                prediction: self.prediction.as_ref(),
                confidence_threshold: self.confidence_threshold,
            };
            let plan = self.engine.plan(&members, now, fees);
            if plan.savings_gas < self.config.min_savings_gas {
                debug!(
                    "Group of {} kept in pool: saves {:.0} gas, threshold {:.0}",
                    group.len(),
                    plan.savings_gas,
                    self.config.min_savings_gas
                );
                continue;
            }

            let transactions = self.pool.take_many(&group);
            let batch = self.engine.create_batch(
                transactions,
                plan,
                BatchStatus::Pending,
                selection.strategy.name(),
                now,
            );
            info!(
                "Batch #{} created with {} transactions via {}, saving {:.0} gwei",
                batch.id,
                batch.len(),
                batch.strategy,
                batch.savings
            );
            self.track(batch.clone());
            created.push(batch);
        }

        created
    }

    /// `Pending -> Scheduled`
    pub fn schedule(&mut self, id: BatchId) -> SchedulerResult<TransactionBatch> {
        self.transition(id, BatchStatus::Scheduled).map(|b| b.clone())
    }

    /// `Scheduled -> Executing`
    pub fn begin_execution(&mut self, id: BatchId) -> SchedulerResult<TransactionBatch> {
        let batch = self.transition(id, BatchStatus::Executing)?;
        info!("Batch #{} executing ({} transactions)", id, batch.len());
        Ok(batch.clone())
    }

    /// `Executing -> Completed`
    ///
    /// Savings are realised from the receipt when the gateway reports the
    /// cost it paid, otherwise the estimate stands.
    pub fn complete(
        &mut self,
        id: BatchId,
        receipt: &SubmissionReceipt,
        now: DateTime<Utc>,
    ) -> SchedulerResult<BatchEvent> {
        let batch = self.transition(id, BatchStatus::Completed)?;
        if let Some(cost) = receipt.realized_cost {
            batch.savings = batch.fee_quote.unbatched_cost - cost;
        }
        let event = BatchEvent::BatchExecuted {
            batch_id: id,
            transaction_ids: batch.transaction_ids(),
            savings: batch.savings,
            execution_time: now,
        };
        let savings = batch.savings;
        let ids = batch.transaction_ids();

        for tx_id in &ids {
            self.in_flight.remove(tx_id);
        }
        self.retired.push_back((now, id));
        self.completed_batches += 1;
        self.total_savings += savings;
        info!("Batch #{} completed ({}), saved {:.0} gwei", id, receipt.reference, savings);

        Ok(event)
    }

    /// `Executing -> Failed`, returning every member transaction to the pool
    pub fn fail(&mut self, id: BatchId, reason: String, now: DateTime<Utc>) -> SchedulerResult<BatchEvent> {
        let batch = self.transition(id, BatchStatus::Failed)?;
        batch.failure_reason = Some(reason.clone());
        let transactions = batch.transactions.clone();

        for tx in &transactions {
            self.in_flight.remove(&tx.id);
        }
        let requeued = self.pool.requeue(transactions);
        self.requeued_transactions += requeued as u64;
        self.retired.push_back((now, id));
        self.failed_batches += 1;
        warn!("Batch #{} failed: {}; {} transactions requeued", id, reason, requeued);

        Ok(BatchEvent::BatchFailed { batch_id: id, reason })
    }

    /// Drop terminal batches older than the retention period
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let retention = millis(self.config.retention_ms);
        let mut pruned = 0;
        while let Some((finished, id)) = self.retired.front().copied() {
            // An expiry past the end of time never comes
            match finished.checked_add_signed(retention) {
                Some(expiry) if expiry <= now => {}
                _ => break,
            }
            self.retired.pop_front();
            self.batches.remove(&id);
            pruned += 1;
        }
        if pruned > 0 {
            debug!("Pruned {} finished batches", pruned);
        }
        pruned
    }

    /// Dissolve every batch that has not started executing
    ///
    /// Used on shutdown. Their transactions go back to the pool.
    ///
    /// # Returns
    /// Number of transactions returned to the pool
    pub fn release_unstarted(&mut self) -> usize {
        let unstarted: Vec<BatchId> = self
            .batches
            .values()
            .filter(|b| matches!(b.status, BatchStatus::Pending | BatchStatus::Scheduled))
            .map(|b| b.id)
            .collect();

        let mut released = 0;
        for id in unstarted {
            if let Some(batch) = self.batches.remove(&id) {
                for tx in &batch.transactions {
                    self.in_flight.remove(&tx.id);
                }
                released += self.pool.requeue(batch.transactions);
            }
        }
        if released > 0 {
            info!("Released {} unstarted transactions back to the pool", released);
        }
        released
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pool_size: self.pool.len(),
            pending_batches: self.count_with_status(BatchStatus::Pending),
            scheduled_batches: self.count_with_status(BatchStatus::Scheduled),
            executing_batches: self.count_with_status(BatchStatus::Executing),
            completed_batches: self.completed_batches,
            failed_batches: self.failed_batches,
            requeued_transactions: self.requeued_transactions,
            total_savings: self.total_savings,
        }
    }

    fn fee_source(&self) -> FeeSource<'_> {
        FeeSource {
            prediction: self.prediction.as_ref(),
            confidence_threshold: self.confidence_threshold,
        }
    }

    fn track(&mut self, batch: TransactionBatch) {
        self.in_flight.extend(batch.transactions.iter().map(|tx| tx.id));
        self.batches.insert(batch.id, batch);
    }

    fn transition(&mut self, id: BatchId, to: BatchStatus) -> SchedulerResult<&mut TransactionBatch> {
        let batch = self.batches.get_mut(&id).ok_or(SchedulerError::UnknownBatch(id))?;
        if !batch.status.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                batch_id: id,
                from: batch.status,
                to,
            });
        }
        batch.status = to;
        Ok(batch)
    }

    fn count_with_status(&self, status: BatchStatus) -> usize {
        self.batches.values().filter(|b| b.status == status).count()
    }

    /// Split by chain unless cross-chain batching is on, then cap each group
    /// at `max_batch_size`
    fn split_groups(&self, groups: Vec<Vec<TxId>>) -> Vec<Vec<TxId>> {
        let max = self.config.max_batch_size.max(1);
        let mut result = Vec::new();

        for group in groups {
            let by_chain = if self.config.cross_chain_batching {
                vec![group]
            } else {
                let mut chains: Vec<(ChainId, Vec<TxId>)> = Vec::new();
                for id in group {
                    let Some(chain_id) = self.pool.get(&id).map(|tx| tx.chain_id) else {
                        continue;
                    };
                    match chains.iter_mut().find(|(c, _)| *c == chain_id) {
                        Some((_, ids)) => ids.push(id),
                        None => chains.push((chain_id, vec![id])),
                    }
                }
                chains.into_iter().map(|(_, ids)| ids).collect()
            };

            for ids in by_chain {
                result.extend(ids.chunks(max).map(<[TxId]>::to_vec));
            }
        }

        result
    }
}
