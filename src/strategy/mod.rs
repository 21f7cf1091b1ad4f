//! Batching Strategy Module
//!
//! This module implements the strategies that decide which pending
//! transactions travel together. The set is closed: four variants of one
//! enum, dispatched through a single `score`/`partition` interface.
//! - ChainPriority: groups by target chain and priority tier
//! - TransactionType: groups by transaction kind
//! - FeeSimilarity: groups by priority tier as a fee proxy
//! - MixedPairwise: greedy clustering on pairwise similarity

mod strategies;


pub use strategies::{
    BatchingStrategy,
    StrategyContext,
    StrategySelection,
    SIMILARITY_THRESHOLD,
    select_strategy,
    similarity,
};
