//! Transaction Pool Module
//!
//! Holds transactions that are waiting to be batched. The pool is an arena
//! addressed by transaction id, so moving a transaction into a batch (and
//! back on failure) is an O(1) ownership transfer.

mod tx_pool;

pub use tx_pool::TransactionPool;
