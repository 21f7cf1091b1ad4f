//! Batch Trigger Module
//!
//! Decides when a scheduling cycle runs:
//! - Size trigger: the pool has reached the maximum batch size
//! - Timer trigger: the cycle interval elapsed and the pool holds at least
//!   the minimum batch size
//! - Manual: an explicit `create_optimal_batches` request

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    SizeThreshold,
    Timer,
    Manual,
}

impl fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleTrigger::SizeThreshold => "size",
            CycleTrigger::Timer => "timer",
            CycleTrigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

pub fn size_due(pool_size: usize, max_batch_size: usize) -> bool {
    pool_size > 0 && pool_size >= max_batch_size
}

pub fn timer_due(pool_size: usize, min_batch_size: usize) -> bool {
    pool_size > 0 && pool_size >= min_batch_size
}
