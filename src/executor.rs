mod execute;
mod setup;

/// Error returned by `Executor::new` when the worker threads cannot start.
pub use crate::executor::setup::ExecutorSetupError;
use crate::{
    config::QueueConfig,
    executor::{
        execute::{ExecState, Shared},
        setup::spawn_workers,
    },
    sync::{Condvar, Mutex},
    task::{Schedule, Task},
    types::HashSet,
};
use rustc_hash::FxBuildHasher;
use std::sync::Arc;
use tracing::{debug, trace};

/// Concurrent task executor honouring declared dependencies.
///
/// Guarantees relied upon by the subgroup queue:
/// - A task never starts before every one of its dependencies finished.
/// - Each task's completion callback runs exactly once, after it finished.
///
/// At most `max_concurrent_tasks` tasks run at once. Ready tasks start in the
/// order they became ready; nothing beyond that is promised about fairness.
/// Handles are cheap to clone and share the same pool.
#[must_use]
#[derive(Debug, Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    /// Start the worker threads described by `config`.
    ///
    /// # Errors
    /// If the worker threads cannot be spawned.
    pub fn new(config: &QueueConfig) -> Result<Self, ExecutorSetupError> {
        let max_concurrent = config.resolved_max_concurrent_tasks();
        let workers = spawn_workers(config, max_concurrent)?;
        debug!(
            max_concurrent,
            suspended = config.is_start_suspended(),
            "executor started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                workers,
                max_concurrent,
                state: Mutex::new(ExecState {
                    suspended: config.is_start_suspended(),
                    ..ExecState::default()
                }),
                idle: Condvar::new(),
            }),
        })
    }

    /// Submit a single task.
    ///
    /// # Panics
    /// If the task was already submitted.
    pub fn submit(&self, task: Task) {
        self.submit_all(vec![task], false);
    }

    /// Submit `tasks`; with `wait`, block until every one of them finished.
    ///
    /// Waiting on a suspended executor blocks until it is resumed from
    /// another thread.
    ///
    /// # Panics
    /// If one of the tasks was already submitted or appears twice. Nothing is
    /// submitted in that case.
    pub fn submit_all(&self, tasks: Vec<Task>, wait: bool) {
        if tasks.is_empty() {
            return;
        }
        let mut seen = HashSet::with_capacity_and_hasher(tasks.len(), FxBuildHasher);
        for task in &tasks {
            assert!(!task.is_submitted(), "{} was already submitted", task.id());
            assert!(seen.insert(task.id()), "{} is submitted twice", task.id());
        }
        drop(seen);
        self.shared.state.lock().outstanding += tasks.len();
        trace!(count = tasks.len(), wait, "submitting tasks");
        let scheduler: Arc<dyn Schedule> = self.shared.clone();
        for task in &tasks {
            task.enqueue(scheduler.clone());
        }
        if wait {
            for task in &tasks {
                // Failures travel through each task's own `wait`, not through
                // the batch.
                let _ = task.wait();
            }
        }
    }

    /// Stop starting new tasks. Running tasks are not interrupted.
    pub fn suspend(&self) {
        self.shared.state.lock().suspended = true;
        debug!("executor suspended");
    }

    /// Start dispatching ready tasks again.
    pub fn resume(&self) {
        let startable = {
            let mut state = self.shared.state.lock();
            state.suspended = false;
            self.shared.take_startable(&mut state)
        };
        debug!(starting = startable.len(), "executor resumed");
        self.shared.start(startable);
    }

    /// Whether [`suspend`](Self::suspend) is in effect.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    /// Block until every submitted task finished.
    pub fn wait_until_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.outstanding > 0 {
            state = self.shared.idle.wait(state);
        }
    }

    /// Number of submitted tasks that have not finished.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// The concurrency limit in effect.
    #[must_use]
    pub fn max_concurrent_tasks(&self) -> usize {
        self.shared.max_concurrent
    }
}
