use fee_batcher::{
    batch::{BatchOrchestrator, DryRunGateway},
    config::Config,
    predictor::{spawn_telemetry_loop, FixedTelemetry, GasPricePredictor, RawNetworkSample},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Runs the scheduler against a dry-run gateway and constant telemetry.
///
/// Loads the configuration (path from the first argument, default
/// `config/default.toml`), starts the orchestrator and the telemetry loop,
/// logs every batch event as JSON, and drains on Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&path)?;

    // RUST_LOG overrides the configured filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("Fee batcher starting with config: {:?}", config);

    let scheduler = BatchOrchestrator::spawn(&config, Arc::new(DryRunGateway));

    let mut predictor = GasPricePredictor::new(config.predictor.clone());
    predictor.initialize(Vec::new());
    let telemetry = Arc::new(FixedTelemetry::new(RawNetworkSample {
        base_fee: Some(config.scheduler.default_base_fee),
        priority_fee: Some(config.scheduler.default_priority_fee),
        ..RawNetworkSample::default()
    }));
    let telemetry_task = spawn_telemetry_loop(predictor, telemetry, scheduler.clone());

    let mut events = scheduler.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("{}", json),
                Err(e) => error!("Failed to encode event: {}", e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    let stats = scheduler.shutdown().await?;
    info!("Final stats: {}", serde_json::to_string(&stats)?);

    telemetry_task.abort();
    event_task.abort();
    Ok(())
}
