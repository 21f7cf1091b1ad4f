//! Configuration Module
//!
//! This module defines all configuration structures for the batcher.
//! Configuration is loaded from TOML files and parsed using serde. Every
//! field has a default, so a partial file (or none at all) is valid.

use crate::types::Priority;
use anyhow::bail;
use serde::Deserialize;
use std::fs;

/// Upper bound for every millisecond duration in the config (one year)
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1_000;

/// Main configuration structure
///
/// # Example TOML
/// ```toml
/// [scheduler]
/// max_batch_size = 20
/// min_batch_size = 5
/// max_wait_time_ms = 900000
///
/// [predictor]
/// history_window = 1000
/// horizons_minutes = [5, 15, 30, 60]
///
/// [logging]
/// filter = "info"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub predictor: PredictorConfig,
    pub logging: LoggingConfig,
}

/// Batch scheduling configuration
///
/// # Fields
/// - `max_batch_size`: Largest batch; a pool this size triggers a cycle at once
/// - `min_batch_size`: Smallest group that becomes a batch; also gates the timer trigger
/// - `max_wait_time_ms`: Delay for a group whose mean priority weight is zero
/// - `cycle_interval_ms`: Period of the timer trigger
/// - `critical_delay_ms`: Offset of fast-lane batches from "now"
/// - `deadline_margin_ms`: How far ahead of a deadline a clamped batch runs
/// - `retention_ms`: How long completed/failed batches stay observable
/// - `cross_chain_batching`: Allow transactions for different chains in one batch
/// - `min_savings_gas`: Groups saving fewer gas-equivalents than this stay pooled
/// - `gas_per_transaction`: Flat gas estimate per transaction
/// - `batch_discount`: Fee-rate discount for batched submission (0.10 = 10%)
/// - `default_base_fee` / `default_priority_fee`: Fee quote (gwei) before any telemetry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub max_wait_time_ms: u64,
    pub cycle_interval_ms: u64,
    pub critical_delay_ms: u64,
    pub deadline_margin_ms: u64,
    pub retention_ms: u64,
    pub cross_chain_batching: bool,
    pub min_savings_gas: f64,
    pub gas_per_transaction: u64,
    pub batch_discount: f64,
    pub default_base_fee: f64,
    pub default_priority_fee: f64,
    pub savings_policy: SavingsPolicy,
    /// Only read by `SavingsPolicy::LatencyAdjusted`
    pub latency_penalty_gwei_per_minute: f64,
    pub priority_weights: PriorityWeights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            min_batch_size: 5,
            max_wait_time_ms: 900_000,
            cycle_interval_ms: 30_000,
            critical_delay_ms: 1_000,
            deadline_margin_ms: 60_000,
            retention_ms: 60_000,
            cross_chain_batching: false,
            min_savings_gas: 0.0,
            gas_per_transaction: 21_000,
            batch_discount: 0.10,
            default_base_fee: 30.0,
            default_priority_fee: 2.0,
            savings_policy: SavingsPolicy::FlatDiscount,
            latency_penalty_gwei_per_minute: 0.0,
            priority_weights: PriorityWeights::default(),
        }
    }
}

/// How batch savings are estimated
///
/// - `flat_discount`: savings are the batch discount on the fee, nothing else
/// - `latency_adjusted`: the waiting time of low-priority members is charged
///   against the savings, so slow-filling groups can fall below `min_savings_gas`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingsPolicy {
    FlatDiscount,
    LatencyAdjusted,
}

/// Urgency weight per priority tier, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl PriorityWeights {
    pub fn weight(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 1.0,
            high: 0.8,
            medium: 0.5,
            low: 0.2,
        }
    }
}

/// Factors the predictor may apply to a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    TimeOfDay,
    DayOfWeek,
    Congestion,
    Trend,
    Noise,
}

/// Gas price predictor configuration
///
/// # Fields
/// - `history_window`: Maximum number of feature records kept
/// - `horizons_minutes`: Forecast horizons
/// - `features`: Active forecast factors; a missing factor is neutral
/// - `update_interval_ms`: Telemetry polling period
/// - `confidence_threshold`: Forecasts below this are ignored by the scheduler
/// - `noise_seed`: Seed for the noise term; random when unset
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub history_window: usize,
    pub horizons_minutes: Vec<u32>,
    pub features: Vec<FeatureKind>,
    pub update_interval_ms: u64,
    pub confidence_threshold: f64,
    pub noise_seed: Option<u64>,
}

impl PredictorConfig {
    pub fn uses(&self, feature: FeatureKind) -> bool {
        self.features.contains(&feature)
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_window: 1_000,
            horizons_minutes: vec![5, 15, 30, 60],
            features: vec![
                FeatureKind::TimeOfDay,
                FeatureKind::DayOfWeek,
                FeatureKind::Congestion,
                FeatureKind::Trend,
                FeatureKind::Noise,
            ],
            update_interval_ms: 60_000,
            confidence_threshold: 0.5,
            noise_seed: None,
        }
    }
}

/// Logging configuration
///
/// `filter` is an `EnvFilter` directive; `RUST_LOG` takes precedence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was read, parsed and validated
    /// * `Err` if the file couldn't be read, the TOML is invalid, or a value is out of range
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.scheduler;
        if s.min_batch_size == 0 {
            bail!("scheduler.min_batch_size must be at least 1");
        }
        if s.min_batch_size > s.max_batch_size {
            bail!(
                "scheduler.min_batch_size ({}) exceeds max_batch_size ({})",
                s.min_batch_size,
                s.max_batch_size
            );
        }
        if s.cycle_interval_ms == 0 {
            bail!("scheduler.cycle_interval_ms must be positive");
        }
        for (field, ms) in [
            ("max_wait_time_ms", s.max_wait_time_ms),
            ("cycle_interval_ms", s.cycle_interval_ms),
            ("critical_delay_ms", s.critical_delay_ms),
            ("deadline_margin_ms", s.deadline_margin_ms),
            ("retention_ms", s.retention_ms),
        ] {
            if ms > MAX_DURATION_MS {
                bail!("scheduler.{} must be at most {} ms, got {}", field, MAX_DURATION_MS, ms);
            }
        }
        if !(0.0..1.0).contains(&s.batch_discount) {
            bail!("scheduler.batch_discount must be in [0, 1)");
        }
        let w = &s.priority_weights;
        for (tier, weight) in [
            ("critical", w.critical),
            ("high", w.high),
            ("medium", w.medium),
            ("low", w.low),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                bail!("scheduler.priority_weights.{} must be in [0, 1], got {}", tier, weight);
            }
        }

        let p = &self.predictor;
        if p.history_window == 0 {
            bail!("predictor.history_window must be positive");
        }
        if p.horizons_minutes.is_empty() {
            bail!("predictor.horizons_minutes must not be empty");
        }
        if p.update_interval_ms == 0 || p.update_interval_ms > MAX_DURATION_MS {
            bail!("predictor.update_interval_ms must be in [1, {}]", MAX_DURATION_MS);
        }
        if !(0.0..=1.0).contains(&p.confidence_threshold) {
            bail!("predictor.confidence_threshold must be in [0, 1]");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.scheduler.max_batch_size, 20);
        assert_eq!(config.scheduler.min_batch_size, 5);
        assert_eq!(config.predictor.horizons_minutes, vec![5, 15, 30, 60]);
        assert_eq!(config.scheduler.savings_policy, SavingsPolicy::FlatDiscount);
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [scheduler]
            min_batch_size = 2
            savings_policy = "latency_adjusted"

            [scheduler.priority_weights]
            low = 0.1

            [predictor]
            features = ["congestion", "trend"]
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.min_batch_size, 2);
        assert_eq!(config.scheduler.max_batch_size, 20);
        assert_eq!(config.scheduler.savings_policy, SavingsPolicy::LatencyAdjusted);
        assert_eq!(config.scheduler.priority_weights.low, 0.1);
        assert_eq!(config.scheduler.priority_weights.medium, 0.5);
        assert!(config.predictor.uses(FeatureKind::Trend));
        assert!(!config.predictor.uses(FeatureKind::Noise));
    }

    #[test]
    fn test_rejects_min_above_max() {
        let err = Config::from_toml(
            r#"
            [scheduler]
            min_batch_size = 30
            max_batch_size = 10
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds max_batch_size"));
    }

    #[test]
    fn test_rejects_weight_out_of_range() {
        let err = Config::from_toml(
            r#"
            [scheduler.priority_weights]
            high = 1.5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("priority_weights.high"));
    }

    #[test]
    fn test_rejects_durations_beyond_a_year() {
        let err = Config::from_toml("[scheduler]\nmax_wait_time_ms = 9223372036854775807").unwrap_err();
        assert!(err.to_string().contains("max_wait_time_ms"));

        let err = Config::from_toml("[scheduler]\nretention_ms = 31536000001").unwrap_err();
        assert!(err.to_string().contains("retention_ms"));

        assert!(Config::from_toml("[scheduler]\ndeadline_margin_ms = 31536000000").is_ok());
    }

    #[test]
    fn test_rejects_empty_horizons() {
        assert!(Config::from_toml("[predictor]\nhorizons_minutes = []").is_err());
    }
}
