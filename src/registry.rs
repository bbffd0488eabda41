mod marker;
#[cfg(all(test, feature = "loom"))]
mod model_check;

use crate::{
    sync::Mutex,
    task::Task,
    types::{HashMap, HashSet, SubgroupKey},
};
use core::fmt;
use rustc_hash::FxBuildHasher;
use std::{collections::VecDeque, sync::Arc};
use tracing::trace;

/// Key -> in-flight tasks of that subgroup, stored as `(task, marker)` pairs
/// in submission order. Keys with no outstanding pair are removed.
pub(crate) type Groups<K> = Mutex<HashMap<K, VecDeque<Task>>>;

/// Thread-safe bookkeeping of serial subgroups.
///
/// Registering a task chains it behind everything already registered under
/// the same key and pairs it with a marker that cleans the entry up once the
/// task finished. The registry never submits anything itself: the tasks it
/// returns must be handed, all of them and in order, to an executor.
///
/// Handles are cheap to clone and share the same bookkeeping.
pub struct SubgroupRegistry<K> {
    groups: Arc<Groups<K>>,
}

impl<K> Clone for SubgroupRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            groups: self.groups.clone(),
        }
    }
}

impl<K> fmt::Debug for SubgroupRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubgroupRegistry").finish_non_exhaustive()
    }
}

impl<K: SubgroupKey> Default for SubgroupRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SubgroupKey> SubgroupRegistry<K> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: Arc::new(Mutex::new(HashMap::default())),
        }
    }

    /// Register one task under `key`.
    ///
    /// Returns `[task, marker]`, both of which must be submitted.
    ///
    /// # Panics
    /// If `task` was already submitted or registered.
    #[must_use = "the returned tasks must be submitted to an executor"]
    pub fn register(&self, task: Task, key: K) -> Vec<Task> {
        self.register_all([task], key)
    }

    /// Register `tasks` under `key`; they run in iteration order, after
    /// every task already registered under `key`.
    ///
    /// Returns the `(task, marker)` pairs flattened in input order, all of
    /// which must be submitted. Registering nothing is a no-op.
    ///
    /// # Panics
    /// If a task was already submitted or registered, or appears twice. The
    /// bookkeeping is left untouched in that case.
    #[must_use = "the returned tasks must be submitted to an executor"]
    pub fn register_all(&self, tasks: impl IntoIterator<Item = Task>, key: K) -> Vec<Task> {
        let tasks: Vec<Task> = tasks.into_iter().collect();
        if tasks.is_empty() {
            return Vec::new();
        }
        let mut seen = HashSet::with_capacity_and_hasher(tasks.len(), FxBuildHasher);
        for task in &tasks {
            assert!(!task.is_submitted(), "{} was already submitted", task.id());
            assert!(seen.insert(task.id()), "{} is registered twice", task.id());
        }
        drop(seen);
        // Claims are taken one task at a time; a concurrent registration of
        // the same task loses here and gives back what it claimed.
        for (claimed, task) in tasks.iter().enumerate() {
            if !task.claim_registration() {
                tasks[..claimed].iter().for_each(Task::release_registration);
                panic!("{} is already registered in a subgroup", task.id());
            }
        }

        let mut submission = Vec::with_capacity(tasks.len() * 2);
        let mut groups = self.groups.lock();
        let group = groups.entry(key.clone()).or_default();
        for task in tasks {
            let marker = marker::for_task(&task, key.clone(), Arc::downgrade(&self.groups));
            // New tasks only need to depend on the group's tail, which is the
            // previous pair's marker.
            if let Some(tail) = group.back() {
                task.add_dependency(tail);
            }
            group.push_back(task.clone());
            group.push_back(marker.clone());
            submission.push(task);
            submission.push(marker);
        }
        trace!(
            ?key,
            registered = submission.len() / 2,
            outstanding = group.len() / 2,
            "registered subgroup tasks"
        );
        submission
    }

    /// Snapshot of the unfinished tasks registered under `key`, in
    /// submission order. Empty for unknown keys.
    #[must_use]
    pub fn tasks(&self, key: &K) -> Vec<Task> {
        self.groups.lock().get(key).map_or_else(Vec::new, |group| {
            group
                .iter()
                .filter(|task| !task.is_marker())
                .cloned()
                .collect()
        })
    }

    /// Whether `key` has unfinished tasks.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.groups.lock().contains_key(key)
    }

    /// Number of subgroups with unfinished tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    /// Whether no subgroup has unfinished tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.lock().is_empty()
    }

    #[cfg(all(test, not(feature = "loom")))]
    fn raw(&self, key: &K) -> Vec<Task> {
        self.groups
            .lock()
            .get(key)
            .map_or_else(Vec::new, |group| group.iter().cloned().collect())
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::SubgroupRegistry;
    use crate::task::{Schedule, Task};
    use pretty_assertions::assert_eq;
    use std::{
        panic::{AssertUnwindSafe, catch_unwind},
        sync::Arc,
    };

    /// Runs tasks on the thread that made them ready.
    struct Inline;

    impl Schedule for Inline {
        fn schedule(&self, task: Task) {
            task.run();
        }

        fn finished(&self, _task: &Task) {}
    }

    fn enqueue(tasks: &[Task]) {
        let scheduler: Arc<dyn Schedule> = Arc::new(Inline);
        for task in tasks {
            task.enqueue(scheduler.clone());
        }
    }

    #[test]
    fn builds_a_single_chain_of_pairs() {
        let registry = SubgroupRegistry::new();
        let (a, b, c) = (Task::new(|| {}), Task::new(|| {}), Task::new(|| {}));

        let first = registry.register(a.clone(), "k");
        let rest = registry.register_all([b.clone(), c.clone()], "k");
        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 4);
        assert_eq!(first[0], a);
        assert_eq!(rest[0], b);
        assert_eq!(rest[2], c);

        let raw = registry.raw(&"k");
        assert_eq!(raw.len(), 6);
        for (index, pair) in raw.chunks(2).enumerate() {
            let (task, marker) = (&pair[0], &pair[1]);
            assert!(!task.is_marker());
            assert!(marker.is_marker());
            assert_eq!(marker.dependencies(), vec![task.clone()]);
            if index == 0 {
                assert!(task.dependencies().is_empty());
            } else {
                assert_eq!(task.dependencies(), vec![raw[index * 2 - 1].clone()]);
            }
        }
        assert_eq!(registry.tasks(&"k"), vec![a, b, c]);
    }

    #[test]
    fn unknown_and_empty_registrations_leave_no_entry() {
        let registry = SubgroupRegistry::<&'static str>::new();
        assert!(registry.tasks(&"missing").is_empty());
        assert!(registry.register_all(Vec::new(), "k").is_empty());
        assert!(!registry.contains(&"k"));
        assert!(registry.is_empty());
    }

    #[test]
    fn finished_pairs_are_removed_and_the_key_dropped() {
        let registry = SubgroupRegistry::new();
        let blocker = Task::new(|| {});
        let head = Task::new(|| {});
        head.add_dependency(&blocker);
        let tail = Task::new(|| {});

        let mut submission = registry.register(head.clone(), 1_u32);
        submission.extend(registry.register(tail.clone(), 1));
        enqueue(&submission);
        assert_eq!(registry.tasks(&1), vec![head, tail]);

        enqueue(&[blocker]);
        assert!(registry.tasks(&1).is_empty());
        assert!(!registry.contains(&1));
    }

    #[test]
    fn repeated_cycles_do_not_accumulate_state() {
        let registry = SubgroupRegistry::new();
        for round in 0..50 {
            enqueue(&registry.register(Task::new(|| {}), round % 3));
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn rejected_batch_leaves_bookkeeping_untouched() {
        let registry = SubgroupRegistry::new();
        let blocker = Task::new(|| {});
        let submitted = Task::new(|| {});
        submitted.add_dependency(&blocker);
        enqueue(&[submitted.clone()]);

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = registry.register_all([Task::new(|| {}), submitted], "k");
        }));
        assert!(result.is_err());
        assert!(registry.is_empty());

        let task = Task::new(|| {});
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = registry.register_all([task.clone(), task], "k");
        }));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn task_registered_twice_is_rejected() {
        let registry = SubgroupRegistry::new();
        let task = Task::new(|| {});
        let submission = registry.register(task.clone(), "k");

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = registry.register(task.clone(), "k");
        }));
        assert!(result.is_err());
        let fresh = Task::new(|| {});
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = registry.register_all([fresh.clone(), task.clone()], "other");
        }));
        assert!(result.is_err());
        assert_eq!(registry.raw(&"k").len(), 2);
        assert!(!registry.contains(&"other"));

        // The rejected batch gave its claim on `fresh` back.
        let later = registry.register(fresh.clone(), "other");
        enqueue(&submission);
        enqueue(&later);
        assert!(task.is_finished());
        assert!(fresh.is_finished());
        assert!(registry.is_empty());
    }

    #[test]
    fn markers_outliving_the_registry_are_harmless() {
        let registry = SubgroupRegistry::new();
        let submission = registry.register(Task::new(|| {}), "k");
        drop(registry);
        enqueue(&submission);
        assert!(submission.iter().all(Task::is_finished));
    }
}
