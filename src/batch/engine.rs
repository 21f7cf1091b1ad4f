//! Batch Engine Module
//!
//! This module turns a group of transactions into a `TransactionBatch`:
//! it picks the execution time, quotes the fee and estimates the savings.
//! Each batch is assigned a unique sequential ID.
//!
//! # Timing
//! `delay = max_wait_time * (1 - mean priority weight)`. A confident forecast
//! that is cheaper than the current fee can pull the time earlier, never
//! later. A deadline the delay would miss clamps the time to
//! `deadline - deadline_margin`.
//!
//! # Cost
//! Gas is `gas_per_transaction * size`. Groups of two or more get
//! `batch_discount` off the fee rate; savings are unbatched minus batched cost.

use crate::{
    config::{SavingsPolicy, SchedulerConfig},
    predictor::PredictionResult,
    BatchId, BatchStatus, FeeQuote, PendingTransaction, TransactionBatch,
};
use chrono::{DateTime, Duration, Utc};

/// Where fee rates come from when planning a batch
#[derive(Debug, Clone, Copy)]
pub struct FeeSource<'a> {
    pub prediction: Option<&'a PredictionResult>,
    /// Forecasts below this confidence are ignored
    pub confidence_threshold: f64,
}

/// Timing and cost decided for a group, before it becomes a batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPlan {
    pub scheduled_time: DateTime<Utc>,
    pub fee_quote: FeeQuote,
    pub savings: f64,
    /// `savings` expressed in gas units at the quoted fee rate
    pub savings_gas: f64,
    pub mean_weight: f64,
}

/// Batch creation engine
///
/// Plans and seals batches. Maintains a sequential batch ID counter.
pub struct BatchEngine {
    config: SchedulerConfig,
    /// Next batch ID to assign (starts at 1, increments for each batch)
    next_batch_id: BatchId,
}

impl BatchEngine {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            next_batch_id: 1,
        }
    }

    /// Decide execution time, fee quote and savings for a group
    pub fn plan(&self, members: &[&PendingTransaction], now: DateTime<Utc>, fees: FeeSource<'_>) -> BatchPlan {
        let mean_weight = self.mean_priority_weight(members);
        let priority_delay = self.priority_delay(mean_weight);
        let delay = optimal_delay(priority_delay, fees);

        let deadline = members.iter().filter_map(|tx| tx.deadline).min();
        let target = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let scheduled_time = self.clamp_to_deadline(target, now, deadline);

        let delay_minutes = (scheduled_time - now).num_milliseconds().max(0) as f64 / 60_000.0;
        let (base_fee, priority_fee) = fee_rates_at(delay_minutes, fees, &self.config);
        let fee_quote = self.quote(members.len(), base_fee, priority_fee);

        let mut savings = fee_quote.unbatched_cost - fee_quote.batched_cost;
        if self.config.savings_policy == SavingsPolicy::LatencyAdjusted {
            savings -= self.config.latency_penalty_gwei_per_minute
                * delay_minutes
                * (1.0 - mean_weight)
                * members.len() as f64;
        }

        BatchPlan {
            scheduled_time,
            fee_quote,
            savings,
            savings_gas: savings_in_gas(savings, fee_quote.fee_rate()),
            mean_weight,
        }
    }

    /// Plan a single critical transaction: run `critical_delay_ms` from now
    /// at the current fee, no batching discount
    pub fn fast_lane_plan(&self, tx: &PendingTransaction, now: DateTime<Utc>, fees: FeeSource<'_>) -> BatchPlan {
        let (base_fee, priority_fee) = current_fee_rates(fees, &self.config);
        let fee_quote = self.quote(1, base_fee, priority_fee);

        let critical_delay = millis(self.config.critical_delay_ms);

        BatchPlan {
            scheduled_time: now.checked_add_signed(critical_delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
            fee_quote,
            savings: 0.0,
            savings_gas: 0.0,
            mean_weight: self.config.priority_weights.weight(tx.priority),
        }
    }

    /// Seal transactions into a batch with the next ID
    pub fn create_batch(
        &mut self,
        transactions: Vec<PendingTransaction>,
        plan: BatchPlan,
        status: BatchStatus,
        strategy: &str,
        now: DateTime<Utc>,
    ) -> TransactionBatch {
        let batch = TransactionBatch {
            id: self.next_batch_id,
            transactions,
            fee_quote: plan.fee_quote,
            scheduled_time: plan.scheduled_time,
            status,
            savings: plan.savings,
            strategy: strategy.to_string(),
            created_at: now,
            failure_reason: None,
        };

        self.next_batch_id += 1;
        batch
    }

    pub fn mean_priority_weight(&self, members: &[&PendingTransaction]) -> f64 {
        if members.is_empty() {
            return 0.0;
        }
        let total: f64 = members
            .iter()
            .map(|tx| self.config.priority_weights.weight(tx.priority))
            .sum();
        total / members.len() as f64
    }

    /// `max_wait_time * (1 - mean_weight)`
    pub fn priority_delay(&self, mean_weight: f64) -> Duration {
        let factor = (1.0 - mean_weight).clamp(0.0, 1.0);
        Duration::milliseconds((self.config.max_wait_time_ms as f64 * factor).round() as i64)
    }

    pub fn quote(&self, size: usize, base_fee: f64, priority_fee: f64) -> FeeQuote {
        let gas_units = self.config.gas_per_transaction * size as u64;
        let unbatched_cost = gas_units as f64 * (base_fee + priority_fee);
        let batched_cost = if size > 1 {
            unbatched_cost * (1.0 - self.config.batch_discount)
        } else {
            unbatched_cost
        };

        FeeQuote {
            gas_units,
            base_fee,
            priority_fee,
            unbatched_cost,
            batched_cost,
        }
    }

    fn clamp_to_deadline(
        &self,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        match deadline {
            Some(deadline) if target > deadline => {
                let margin = millis(self.config.deadline_margin_ms);
                deadline.checked_sub_signed(margin).unwrap_or(now).max(now)
            }
            _ => target,
        }
    }
}

/// Cheapest confident horizon inside the priority delay, if it beats the
/// current fee; otherwise the priority delay itself
fn optimal_delay(priority_delay: Duration, fees: FeeSource<'_>) -> Duration {
    let Some(prediction) = fees.prediction else {
        return priority_delay;
    };

    let current = prediction.features.base_fee + prediction.features.priority_fee;
    prediction
        .confident(fees.confidence_threshold)
        .filter(|f| Duration::minutes(i64::from(f.horizon_minutes)) <= priority_delay)
        .min_by(|a, b| a.total_fee().total_cmp(&b.total_fee()))
        .filter(|f| f.total_fee() < current)
        .map(|f| Duration::minutes(i64::from(f.horizon_minutes)))
        .unwrap_or(priority_delay)
}

fn fee_rates_at(delay_minutes: f64, fees: FeeSource<'_>, config: &SchedulerConfig) -> (f64, f64) {
    fees.prediction
        .and_then(|p| p.nearest(delay_minutes, fees.confidence_threshold))
        .map(|f| (f.base_fee, f.priority_fee))
        .unwrap_or_else(|| current_fee_rates(fees, config))
}

fn current_fee_rates(fees: FeeSource<'_>, config: &SchedulerConfig) -> (f64, f64) {
    match fees.prediction {
        Some(p) => (p.features.base_fee, p.features.priority_fee),
        None => (config.default_base_fee, config.default_priority_fee),
    }
}

/// Config milliseconds as a `Duration`, saturating instead of wrapping
pub(crate) fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

fn savings_in_gas(savings: f64, fee_rate: f64) -> f64 {
    if fee_rate > 0.0 { savings / fee_rate } else { 0.0 }
}
