//! Gas Price Predictor Module
//!
//! Forecasts base and priority fees at each configured horizon from the
//! current sample, the demand curves, congestion and the recent history.
//!
//! # Forecast for horizon `h` minutes
//! 1. Current fee x hour and weekday multipliers
//! 2. x `1 + 0.5 * congestion`
//! 3. x `1 + trend * h/60` (trend from the newest 20 samples)
//! 4. x `1 + u * volatility * h/60`, `u` uniform in [-0.5, 0.5]
//! 5. Confidence `0.9 * e^(-h/120) * (1 - volatility/2)`, x0.8 above 0.8 congestion
//!
//! With fewer than 10 samples of history the trend is 0 and volatility is
//! 0.1, so a cold predictor still answers from the demand curves alone.

use super::features::{NetworkFeatureSampler, NetworkFeatures, RawNetworkSample};
use super::patterns::{day_of_week_multiplier, hour_multiplier};
use crate::config::{FeatureKind, PredictorConfig};
use crate::error::PredictorError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Samples considered for trend and volatility
const RECENT_WINDOW: usize = 20;
/// Below this many samples trend and volatility fall back to defaults
const MIN_SAMPLES: usize = 10;
const DEFAULT_VOLATILITY: f64 = 0.1;

const MIN_BASE_FEE: f64 = 1.0;
const MIN_PRIORITY_FEE: f64 = 0.1;
const HIGH_CONGESTION: f64 = 0.8;

/// Forecast for one horizon
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub horizon_minutes: u32,
    pub base_fee: f64,
    pub priority_fee: f64,
    pub confidence: f64,
}

impl HorizonForecast {
    pub fn total_fee(&self) -> f64 {
        self.base_fee + self.priority_fee
    }
}

/// Output of one `predict` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub features: NetworkFeatures,
    pub forecasts: Vec<HorizonForecast>,
    pub trend: f64,
    pub volatility: f64,
}

impl PredictionResult {
    pub fn forecast(&self, horizon_minutes: u32) -> Option<&HorizonForecast> {
        self.forecasts.iter().find(|f| f.horizon_minutes == horizon_minutes)
    }

    /// Forecasts whose confidence reaches `threshold`
    pub fn confident(&self, threshold: f64) -> impl Iterator<Item = &HorizonForecast> {
        self.forecasts.iter().filter(move |f| f.confidence >= threshold)
    }

    /// Confident forecast whose horizon is closest to `minutes` ahead
    pub fn nearest(&self, minutes: f64, threshold: f64) -> Option<&HorizonForecast> {
        self.confident(threshold).min_by(|a, b| {
            let da = (f64::from(a.horizon_minutes) - minutes).abs();
            let db = (f64::from(b.horizon_minutes) - minutes).abs();
            da.total_cmp(&db)
        })
    }
}

pub struct GasPricePredictor {
    config: PredictorConfig,
    sampler: NetworkFeatureSampler,
    /// Oldest first, at most `config.history_window` entries
    history: VecDeque<NetworkFeatures>,
    rng: StdRng,
    initialized: bool,
}

impl GasPricePredictor {
    pub fn new(config: PredictorConfig) -> Self {
        let rng = match config.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            history: VecDeque::with_capacity(config.history_window),
            config,
            sampler: NetworkFeatureSampler,
            rng,
            initialized: false,
        }
    }

    /// Seed the history and enable `predict`
    ///
    /// An empty seed is fine; forecasts then rely on the demand curves until
    /// enough samples have been observed.
    pub fn initialize<I>(&mut self, seed: I)
    where
        I: IntoIterator<Item = RawNetworkSample>,
    {
        for raw in seed {
            self.observe(raw);
        }
        self.initialized = true;
        info!(
            "Gas price predictor initialized with {} samples (window {})",
            self.history.len(),
            self.config.history_window
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Record a sample without forecasting
    pub fn observe(&mut self, raw: RawNetworkSample) -> NetworkFeatures {
        let features = self.sampler.sample(raw);
        self.push(features.clone());
        features
    }

    pub fn predict(&mut self, raw: RawNetworkSample) -> Result<PredictionResult, PredictorError> {
        if !self.initialized {
            return Err(PredictorError::NotInitialized);
        }

        let features = self.sampler.sample(raw);
        let trend = self.trend();
        let volatility = self.volatility();

        let horizons = self.config.horizons_minutes.clone();
        let forecasts = horizons
            .into_iter()
            .map(|h| self.forecast_horizon(&features, h, trend, volatility))
            .collect();

        debug!(
            "Predicted fees at congestion {:.3}, trend {:.4}, volatility {:.4}",
            features.congestion, trend, volatility
        );

        self.push(features.clone());

        Ok(PredictionResult {
            features,
            forecasts,
            trend,
            volatility,
        })
    }

    /// Relative change between the older and newer halves of the recent window
    pub fn trend(&self) -> f64 {
        let window = self.recent_base_fees();
        if window.len() < MIN_SAMPLES {
            return 0.0;
        }

        let (old, new) = window.split_at(window.len() / 2);
        let old_avg = mean(old);
        if old_avg <= 0.0 {
            return 0.0;
        }
        (mean(new) - old_avg) / old_avg
    }

    /// Coefficient of variation of base fee over the recent window
    pub fn volatility(&self) -> f64 {
        let window = self.recent_base_fees();
        if window.len() < MIN_SAMPLES {
            return DEFAULT_VOLATILITY;
        }

        let m = mean(&window);
        if m <= 0.0 {
            return DEFAULT_VOLATILITY;
        }
        let variance = window.iter().map(|v| (v - m).powi(2)).sum::<f64>() / window.len() as f64;
        variance.sqrt() / m
    }

    fn forecast_horizon(
        &mut self,
        features: &NetworkFeatures,
        horizon_minutes: u32,
        trend: f64,
        volatility: f64,
    ) -> HorizonForecast {
        let horizon = f64::from(horizon_minutes) / 60.0;

        let mut multiplier = 1.0;
        if self.config.uses(FeatureKind::TimeOfDay) {
            multiplier *= hour_multiplier(features.hour);
        }
        if self.config.uses(FeatureKind::DayOfWeek) {
            multiplier *= day_of_week_multiplier(features.day_of_week);
        }
        if self.config.uses(FeatureKind::Congestion) {
            multiplier *= 1.0 + 0.5 * features.congestion;
        }
        if self.config.uses(FeatureKind::Trend) {
            multiplier *= 1.0 + trend * horizon;
        }
        if self.config.uses(FeatureKind::Noise) {
            let u: f64 = self.rng.gen_range(-0.5..=0.5);
            multiplier *= 1.0 + u * volatility * horizon;
        }

        let base_fee = (features.base_fee * multiplier).max(MIN_BASE_FEE);
        let priority_fee = round_tenth(features.priority_fee * multiplier).max(MIN_PRIORITY_FEE);

        HorizonForecast {
            horizon_minutes,
            base_fee,
            priority_fee,
            confidence: confidence(horizon_minutes, volatility, features.congestion),
        }
    }

    fn push(&mut self, features: NetworkFeatures) {
        if self.config.history_window == 0 {
            return;
        }
        while self.history.len() >= self.config.history_window {
            self.history.pop_front();
        }
        self.history.push_back(features);
    }

    /// Base fees of the newest samples, oldest first
    fn recent_base_fees(&self) -> Vec<f64> {
        let skip = self.history.len().saturating_sub(RECENT_WINDOW);
        self.history.iter().skip(skip).map(|f| f.base_fee).collect()
    }
}

/// Confidence for a horizon, in [0.3, 1.0]
pub(crate) fn confidence(horizon_minutes: u32, volatility: f64, congestion: f64) -> f64 {
    let mut c = 0.9 * (-f64::from(horizon_minutes) / 120.0).exp() * (1.0 - volatility * 0.5);
    if congestion > HIGH_CONGESTION {
        c *= 0.8;
    }
    c.clamp(0.3, 1.0)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
