use crate::{
    config::QueueConfig,
    executor::{Executor, ExecutorSetupError},
    registry::SubgroupRegistry,
    task::Task,
    types::SubgroupKey,
};
use derive_more::{Debug, Deref};

/// Concurrent queue with serial subgroups.
///
/// Tasks submitted under the same key run one after another in submission
/// order; tasks under different keys run in parallel, bounded by the
/// executor's concurrency limit. Finished tasks leave their subgroup
/// automatically.
///
/// The queue dereferences to its [`Executor`], which provides suspension and
/// [`wait_until_idle`](Executor::wait_until_idle).
#[must_use]
#[derive(Debug, Deref)]
pub struct SubgroupQueue<K> {
    #[deref]
    executor: Executor,
    #[debug(skip)]
    registry: SubgroupRegistry<K>,
}

impl<K: SubgroupKey> SubgroupQueue<K> {
    /// Queue with the default configuration.
    ///
    /// # Errors
    /// If the worker threads cannot be started.
    pub fn new() -> Result<Self, ExecutorSetupError> {
        Self::with_config(QueueConfig::default())
    }

    /// Queue running on an executor built from `config`.
    ///
    /// A concurrency limit of one is a programming error: it serialises
    /// every subgroup into a single lane. Debug builds panic on it.
    ///
    /// # Errors
    /// If the worker threads cannot be started.
    pub fn with_config(config: QueueConfig) -> Result<Self, ExecutorSetupError> {
        debug_assert_ne!(
            config.resolved_max_concurrent_tasks(),
            1,
            "SubgroupQueue must be concurrent to provide any benefit over a serial queue"
        );
        Ok(Self {
            executor: Executor::new(&config)?,
            registry: SubgroupRegistry::new(),
        })
    }

    /// Submit `task` to the subgroup `key`. It starts after every task
    /// already submitted under `key` finished.
    ///
    /// # Panics
    /// If `task` was already submitted, possibly by another thread.
    pub fn submit(&self, task: Task, key: K) {
        self.executor.submit_all(self.registry.register(task, key), false);
    }

    /// Submit `tasks` to the subgroup `key`, to run in iteration order.
    ///
    /// With `wait`, blocks until exactly these tasks finished and left the
    /// subgroup; other tasks are not waited for.
    ///
    /// # Panics
    /// If a task was already submitted or appears twice.
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Task>, key: K, wait: bool) {
        self.executor
            .submit_all(self.registry.register_all(tasks, key), wait);
    }

    /// Wrap `work` in a task and submit it to the subgroup `key`.
    ///
    /// Returns the wrapping task, e.g. to [`wait`](Task::wait) on it.
    pub fn submit_fn(&self, work: impl FnOnce() + Send + 'static, key: K) -> Task {
        let task = Task::new(work);
        self.submit(task.clone(), key);
        task
    }

    /// Snapshot of the unfinished tasks of subgroup `key`, in submission
    /// order. Empty for keys with nothing outstanding.
    #[must_use]
    pub fn tasks(&self, key: &K) -> Vec<Task> {
        self.registry.tasks(key)
    }

    /// Same as [`tasks`](Self::tasks). `Index` cannot hand out an owned
    /// snapshot, so keyed lookup goes through this method.
    #[must_use]
    pub fn get(&self, key: &K) -> Vec<Task> {
        self.tasks(key)
    }

    /// Number of subgroups with unfinished tasks.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::SubgroupQueue;
    use crate::config::QueueConfig;
    use core::num::NonZeroUsize;

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "must be concurrent")]
    fn serial_limit_is_rejected() {
        let config = QueueConfig::default().max_concurrent_tasks(NonZeroUsize::MIN);
        let _ = SubgroupQueue::<u8>::with_config(config);
    }

    #[test]
    fn derefs_to_the_executor() {
        let config = QueueConfig::default()
            .max_concurrent_tasks(NonZeroUsize::new(2).unwrap())
            .start_suspended(true);
        let queue = SubgroupQueue::<u8>::with_config(config).unwrap();
        assert!(queue.is_suspended());
        assert_eq!(queue.max_concurrent_tasks(), 2);
        let task = queue.submit_fn(|| {}, 1);
        assert_eq!(queue.get(&1), vec![task.clone()]);
        queue.resume();
        assert_eq!(task.wait(), Ok(()));
        queue.wait_until_idle();
        assert_eq!(queue.group_count(), 0);
    }
}
