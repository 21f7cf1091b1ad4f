//! Batch Module
//!
//! This module handles everything after a group has been chosen:
//! - BatchEngine: timing, fee quote and savings of a group, sealed into a batch
//! - Trigger: when scheduling cycles run
//! - Gateway: the chain submission capability
//! - Orchestrator: the background worker driving cycles and executions

pub mod engine;
pub mod gateway;
pub mod orchestrator;
pub mod trigger;

#[cfg(test)]
mod tests;

pub use engine::{BatchEngine, BatchPlan, FeeSource};
pub use gateway::{ChainGateway, DryRunGateway, SubmissionReceipt};
pub use orchestrator::{BatchOrchestrator, SchedulerHandle};
pub use trigger::CycleTrigger;
