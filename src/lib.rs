//! Concurrent task queue with keyed serial subgroups.
//!
//! Tasks are submitted together with a subgroup key. Tasks sharing a key run
//! strictly in submission order, one at a time; tasks under different keys
//! run in parallel, bounded only by the executor's concurrency limit.
//!
//! The moving parts:
//! - Every submitted task is paired with an internal *marker*, a zero-work
//!   task depending only on it. Each new task depends on the previous pair's
//!   marker, so a subgroup is a single linear dependency chain.
//! - The registry keeps, per key, the unfinished pairs in submission order.
//!   Because pairs can only finish in that order, a firing marker always
//!   removes the head pair, and keys disappear once their last pair is gone.
//! - The executor runs tasks on rayon worker threads once all their
//!   dependencies finished, never exceeding its concurrency limit.
//!
//! Quick start:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use subgroup_queue::queue::SubgroupQueue;
//!
//! let queue = SubgroupQueue::new().unwrap();
//! let log = Arc::new(Mutex::new(String::new()));
//! for c in ['a', 'b', 'c'] {
//!     let log = log.clone();
//!     queue.submit_fn(move || log.lock().unwrap().push(c), "letters");
//! }
//! queue.wait_until_idle();
//! assert_eq!(*log.lock().unwrap(), "abc");
//! assert!(queue.tasks(&"letters").is_empty());
//! ```
//!
//! Cancelling a task that has not started lets it finish without running its
//! work; the tasks behind it in the subgroup still run, in order.

/// Queue and executor settings.
pub mod config;
/// The dependency-aware executor.
///
/// Runs tasks on a rayon thread pool once their dependencies finished, with
/// an exact concurrency limit and suspension support.
pub mod executor;
/// The subgroup facade over the executor.
pub mod queue;
/// Thread-safe bookkeeping of serial subgroups.
///
/// Builds the per-key dependency chains, pairs every task with its cleanup
/// marker, and serves snapshot queries.
pub mod registry;
mod sync;
/// Tasks: schedulable units of work with dependencies and a completion
/// signal.
pub mod task;
/// Identifiers, key bounds, and aliases shared across the crate.
pub mod types;
mod utils;
