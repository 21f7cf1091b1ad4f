//! This crate decides when, and with which other transactions, a pending
//! blockchain transaction is submitted. It pairs a batching scheduler with a
//! gas price forecaster; signing and broadcasting stay behind the
//! `ChainGateway` trait.

pub mod types; // Transactions, batches and their lifecycle.
pub mod error; // Error types for admission, lifecycle, prediction and submission.
pub mod events; // Outcome events published to the orchestrating layer.
pub mod pool; // Arena of pending transactions.
pub mod strategy; // The four batching strategies and per-cycle selection.
pub mod scheduler; // Single-writer scheduler core and batch lifecycle.
pub mod batch; // Batch planning, triggers, gateway and the async orchestrator.
pub mod predictor; // Network features and multi-horizon fee forecasts.
pub mod config; // Defines and loads configuration.

// Re-export commonly used types and configurations for easier access.
pub use types::*;
pub use config::Config;
pub use batch::{BatchOrchestrator, ChainGateway, SchedulerHandle};
pub use events::BatchEvent;
pub use predictor::GasPricePredictor;
pub use scheduler::BatchScheduler;
