//! Gas Price Prediction Module
//!
//! Turns raw chain telemetry into fee forecasts at several horizons:
//! - features: normalises a raw sample into `NetworkFeatures`
//! - patterns: intraday and weekly demand curves
//! - model: `GasPricePredictor`, the bounded history and the forecast math
//! - telemetry: polling loop that feeds forecasts to the scheduler

mod features;
mod model;
mod patterns;
pub mod telemetry;


pub use features::{NetworkFeatureSampler, NetworkFeatures, RawNetworkSample};
pub use model::{GasPricePredictor, HorizonForecast, PredictionResult};
pub use patterns::{day_of_week_multiplier, hour_multiplier};
pub use telemetry::{FixedTelemetry, TelemetrySource, spawn_telemetry_loop};
