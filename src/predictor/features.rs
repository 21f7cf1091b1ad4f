//! Network Feature Sampling
//!
//! Normalises raw telemetry into `NetworkFeatures`. Missing or non-finite
//! readings fall back to defaults, utilisation is clamped to [0, 1] and the
//! congestion score is derived here.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_FEE: f64 = 30.0;
const DEFAULT_PRIORITY_FEE: f64 = 2.0;
const DEFAULT_BLOCK_UTILIZATION: f64 = 0.5;
const DEFAULT_BLOCK_INTERVAL_SECS: f64 = 12.0;

/// Pending-transaction count at which the backlog term of congestion saturates
const PENDING_SATURATION: f64 = 1_000.0;

/// Telemetry as reported by a source; anything may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNetworkSample {
    pub timestamp: Option<DateTime<Utc>>,
    /// gwei
    pub base_fee: Option<f64>,
    /// gwei
    pub priority_fee: Option<f64>,
    pub block_utilization: Option<f64>,
    pub pending_tx_count: Option<u64>,
    pub mempool_size: Option<u64>,
    /// Seconds between the last two blocks
    pub last_block_interval: Option<f64>,
}

/// Normalised point-in-time snapshot of network conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFeatures {
    pub timestamp: DateTime<Utc>,
    /// 0 = Sunday
    pub day_of_week: u32,
    pub hour: u32,
    pub minute: u32,
    pub base_fee: f64,
    pub priority_fee: f64,
    pub block_utilization: f64,
    pub pending_tx_count: u64,
    pub mempool_size: u64,
    pub last_block_interval: f64,
    /// Blend of utilisation and backlog, in [0, 1]
    pub congestion: f64,
}

/// Converts raw telemetry into `NetworkFeatures`
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkFeatureSampler;

impl NetworkFeatureSampler {
    pub fn sample(&self, raw: RawNetworkSample) -> NetworkFeatures {
        let timestamp = raw.timestamp.unwrap_or_else(Utc::now);
        let block_utilization = finite(raw.block_utilization)
            .unwrap_or(DEFAULT_BLOCK_UTILIZATION)
            .clamp(0.0, 1.0);
        let pending_tx_count = raw.pending_tx_count.unwrap_or(0);

        NetworkFeatures {
            timestamp,
            day_of_week: timestamp.weekday().num_days_from_sunday(),
            hour: timestamp.hour(),
            minute: timestamp.minute(),
            base_fee: finite(raw.base_fee).unwrap_or(DEFAULT_BASE_FEE).max(0.0),
            priority_fee: finite(raw.priority_fee).unwrap_or(DEFAULT_PRIORITY_FEE).max(0.0),
            block_utilization,
            pending_tx_count,
            mempool_size: raw.mempool_size.unwrap_or(0),
            last_block_interval: finite(raw.last_block_interval).unwrap_or(DEFAULT_BLOCK_INTERVAL_SECS),
            congestion: congestion_score(block_utilization, pending_tx_count),
        }
    }
}

/// NaN and infinities count as missing
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// `utilisation * 0.7 + min(pending / 1000, 1) * 0.3`
pub fn congestion_score(block_utilization: f64, pending_tx_count: u64) -> f64 {
    let backlog = (pending_tx_count as f64 / PENDING_SATURATION).min(1.0);
    (block_utilization * 0.7 + backlog * 0.3).clamp(0.0, 1.0)
}
