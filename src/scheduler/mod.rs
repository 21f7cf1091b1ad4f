//! Batch Scheduling Module
//!
//! Owns the pending pool and the batch lifecycle:
//! - Admission: rejects malformed and duplicate transactions
//! - Fast lane: critical transactions become their own batch immediately
//! - Cycles: best strategy over the pool, minimum-size and savings filters
//! - Lifecycle: schedule, execute, complete or fail (failure requeues)

mod scheduler;


pub use scheduler::{AddOutcome, BatchScheduler, FAST_LANE, SchedulerStats};
