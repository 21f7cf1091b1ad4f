//! Telemetry Loop Module
//!
//! Polls a `TelemetrySource` every `update_interval_ms`, runs the predictor
//! on each sample and hands the forecast to the scheduler. A failed sample
//! skips the tick; the loop ends once the scheduler is gone. An uninitialized
//! predictor is initialized with an empty history first.

use super::features::RawNetworkSample;
use super::model::GasPricePredictor;
use crate::batch::SchedulerHandle;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

#[async_trait]
pub trait TelemetrySource: Send + Sync + 'static {
    async fn sample(&self) -> anyhow::Result<RawNetworkSample>;
}

/// Source that reports the same conditions every time
pub struct FixedTelemetry {
    sample: RawNetworkSample,
}

impl FixedTelemetry {
    pub fn new(sample: RawNetworkSample) -> Self {
        Self { sample }
    }
}

#[async_trait]
impl TelemetrySource for FixedTelemetry {
    async fn sample(&self) -> anyhow::Result<RawNetworkSample> {
        // Leave the timestamp unset so each sample is stamped "now"
        Ok(RawNetworkSample {
            timestamp: None,
            ..self.sample.clone()
        })
    }
}

pub fn spawn_telemetry_loop(
    mut predictor: GasPricePredictor,
    source: Arc<dyn TelemetrySource>,
    scheduler: SchedulerHandle,
) -> JoinHandle<()> {
    let period = Duration::from_millis(predictor.config().update_interval_ms);

    tokio::spawn(async move {
        if !predictor.is_initialized() {
            warn!("Predictor handed over uninitialized, starting from an empty history");
            predictor.initialize(Vec::new());
        }
        info!("Telemetry loop started, polling every {}ms", period.as_millis());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let raw = match source.sample().await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Telemetry sample failed: {:?}", e);
                    continue;
                }
            };

            let prediction = match predictor.predict(raw) {
                Ok(prediction) => prediction,
                Err(e) => {
                    warn!("Prediction skipped: {}", e);
                    continue;
                }
            };
            debug!(
                "Forecast published: {} horizons, congestion {:.3}",
                prediction.forecasts.len(),
                prediction.features.congestion
            );

            if scheduler.update_prediction(prediction).await.is_err() {
                info!("Scheduler stopped, telemetry loop exiting");
                break;
            }
        }
    })
}
