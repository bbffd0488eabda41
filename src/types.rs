use core::{
    fmt::Debug,
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
};
use derive_more::Display;
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// Unique identifier of a task.
///
/// Identifiers are handed out from a process-wide counter and never reused.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("task#{_0}")]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        // Identity only, never synchronises anything, so it stays outside the
        // loom model.
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Zero-argument unit of work run by a task.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Bound for values identifying a serial subgroup.
///
/// Implemented for every type that is hashable, comparable, cloneable, and
/// can move between worker threads.
pub trait SubgroupKey: Hash + Eq + Clone + Debug + Send + 'static {}

impl<K> SubgroupKey for K where K: Hash + Eq + Clone + Debug + Send + 'static {}

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
