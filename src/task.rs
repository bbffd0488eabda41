use crate::{
    sync::{AtomicUsize, Condvar, Mutex, Ordering},
    types::{TaskId, Work},
    utils::panic_message,
};
use core::{
    fmt,
    hash::{Hash, Hasher},
    mem,
};
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};
use thiserror::Error;
use tracing::warn;

/// Failure reported by [`Task::wait`].
///
/// Failures never affect subgroup bookkeeping: a failed or cancelled task
/// still finishes, and the tasks queued behind it still run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    /// The task was cancelled before it started; its work never ran.
    #[error("{id} was cancelled before it ran")]
    Cancelled {
        /// Cancelled task.
        id: TaskId,
    },
    /// The task's work panicked.
    #[error("{id} panicked: {message}")]
    Panicked {
        /// Failed task.
        id: TaskId,
        /// Panic payload rendered as text.
        message: String,
    },
}

/// Receiver of tasks whose dependencies are all finished.
///
/// Every submitted task holds its scheduler until it finishes.
pub(crate) trait Schedule: Send + Sync {
    /// `task` became ready; it must eventually be passed to [`Task::run`].
    fn schedule(&self, task: Task);
    /// `task` finished; called exactly once per submission.
    fn finished(&self, task: &Task);
}

/// A schedulable unit of work.
///
/// `Task` is a cheap handle: clones refer to the same task, and equality and
/// hashing are by identity. A task is submitted exactly once; dependencies
/// must be declared before that.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

struct Inner {
    id: TaskId,
    name: Option<String>,
    kind: Kind,
    /// One submission token plus one per unfinished dependency. Whoever
    /// takes it to zero hands the task to its scheduler.
    pending: AtomicUsize,
    state: Mutex<State>,
    finished: Condvar,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Kind {
    User,
    /// Zero-work bookkeeping task appended after each subgroup task.
    Marker,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Waiting,
    Ready,
    Executing,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed,
    Cancelled,
    Panicked(String),
}

struct State {
    phase: Phase,
    /// Claimed by a subgroup registration.
    registered: bool,
    cancelled: bool,
    work: Option<Work>,
    completion: Option<Work>,
    dependencies: Vec<Task>,
    dependents: Vec<Task>,
    scheduler: Option<Arc<dyn Schedule>>,
    outcome: Option<Outcome>,
}

impl Task {
    /// Wrap a closure into a task.
    pub fn new(work: impl FnOnce() + Send + 'static) -> Self {
        Self::build(TaskId::next(), None, Kind::User, Box::new(work))
    }

    /// Wrap a closure into a named task. The name only shows up in logs and
    /// `Debug` output.
    pub fn with_name(name: impl Into<String>, work: impl FnOnce() + Send + 'static) -> Self {
        Self::build(TaskId::next(), Some(name.into()), Kind::User, Box::new(work))
    }

    pub(crate) fn marker(id: TaskId, work: impl FnOnce() + Send + 'static) -> Self {
        Self::build(id, None, Kind::Marker, Box::new(work))
    }

    fn build(id: TaskId, name: Option<String>, kind: Kind, work: Work) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                name,
                kind,
                pending: AtomicUsize::new(1),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    registered: false,
                    cancelled: false,
                    work: Some(work),
                    completion: None,
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                    scheduler: None,
                    outcome: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// Identity of the task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Optional human-readable name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Make this task wait for `other` to finish before it starts.
    ///
    /// Depending on an already finished task is allowed and has no effect on
    /// scheduling.
    ///
    /// # Panics
    /// If `other` is this task, or this task was already submitted.
    pub fn add_dependency(&self, other: &Task) {
        assert_ne!(self.id(), other.id(), "{} cannot depend on itself", self.id());
        assert_eq!(
            self.inner.state.lock().phase,
            Phase::Idle,
            "dependencies of {} must be declared before it is submitted",
            self.id()
        );
        {
            let mut other_state = other.inner.state.lock();
            if other_state.phase != Phase::Finished {
                // Counted under `other`'s lock, so its `finish` sees us either
                // in `dependents` or not at all.
                self.inner.pending.fetch_add(1, Ordering::Relaxed);
                other_state.dependents.push(self.clone());
            }
        }
        self.inner.state.lock().dependencies.push(other.clone());
    }

    /// Snapshot of the declared dependencies. Emptied once the task finishes.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Task> {
        self.inner.state.lock().dependencies.clone()
    }

    /// Set the callback run once after the task finishes, whatever the
    /// outcome. Replaces a previously set callback; if the task already
    /// finished, runs `completion` right away on the calling thread.
    pub fn set_completion(&self, completion: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Finished {
            drop(state);
            completion();
        } else {
            state.completion = Some(Box::new(completion));
        }
    }

    /// Ask the task not to run.
    ///
    /// A task cancelled before it starts still waits for its dependencies,
    /// then finishes without running its work, so the tasks queued behind it
    /// keep their order. Cancelling a running or finished task has no effect
    /// on it.
    pub fn cancel(&self) {
        if self.inner.kind == Kind::Marker {
            return;
        }
        let mut state = self.inner.state.lock();
        if matches!(state.phase, Phase::Idle | Phase::Waiting | Phase::Ready) {
            state.cancelled = true;
        }
    }

    /// Whether [`cancel`](Self::cancel) took effect.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Whether the task's work is running right now.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.inner.state.lock().phase == Phase::Executing
    }

    /// Whether the task reached its final state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().phase == Phase::Finished
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Calling this from inside a pool task may deadlock the pool if every
    /// worker ends up waiting.
    ///
    /// # Errors
    /// If the task was cancelled before it ran, or its work panicked.
    pub fn wait(&self) -> Result<(), TaskError> {
        let mut state = self.inner.state.lock();
        while state.phase != Phase::Finished {
            state = self.inner.finished.wait(state);
        }
        match &state.outcome {
            Some(Outcome::Cancelled) => Err(TaskError::Cancelled { id: self.id() }),
            Some(Outcome::Panicked(message)) => Err(TaskError::Panicked {
                id: self.id(),
                message: message.clone(),
            }),
            Some(Outcome::Completed) | None => Ok(()),
        }
    }

    pub(crate) fn is_marker(&self) -> bool {
        self.inner.kind == Kind::Marker
    }

    pub(crate) fn is_submitted(&self) -> bool {
        self.inner.state.lock().phase != Phase::Idle
    }

    /// Claim the task for one subgroup registration. Fails if it already
    /// belongs to a subgroup or was submitted.
    pub(crate) fn claim_registration(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Idle || state.registered {
            return false;
        }
        state.registered = true;
        true
    }

    /// Undo [`claim_registration`](Self::claim_registration) for a batch that
    /// was rejected before touching any subgroup.
    pub(crate) fn release_registration(&self) {
        self.inner.state.lock().registered = false;
    }

    /// Hand the task to `scheduler` and release the submission token.
    ///
    /// # Panics
    /// If the task was already submitted.
    pub(crate) fn enqueue(&self, scheduler: Arc<dyn Schedule>) {
        {
            let mut state = self.inner.state.lock();
            assert_eq!(
                state.phase,
                Phase::Idle,
                "{} was already submitted",
                self.id()
            );
            state.phase = Phase::Waiting;
            state.scheduler = Some(scheduler);
        }
        self.release();
    }

    fn release(&self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let scheduler = {
            let mut state = self.inner.state.lock();
            debug_assert_eq!(state.phase, Phase::Waiting, "Task::release: [1]");
            state.phase = Phase::Ready;
            state.scheduler.clone().expect("Task::release: [2]")
        };
        scheduler.schedule(self.clone());
    }

    /// Execute the task on the current thread. Only called by the scheduler
    /// the task was handed to.
    ///
    /// User work is isolated with `catch_unwind`; marker work is not, so an
    /// invariant violation inside a marker stays fatal.
    pub(crate) fn run(&self) {
        let (work, cancelled) = {
            let mut state = self.inner.state.lock();
            debug_assert_eq!(state.phase, Phase::Ready, "Task::run: [1]");
            state.phase = Phase::Executing;
            (state.work.take(), state.cancelled)
        };
        let outcome = match work {
            _ if cancelled => Outcome::Cancelled,
            None => Outcome::Completed,
            Some(work) if self.is_marker() => {
                work();
                Outcome::Completed
            }
            Some(work) => match catch_unwind(AssertUnwindSafe(work)) {
                Ok(()) => Outcome::Completed,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task = %self.id(), name = self.name(), %message, "task panicked");
                    Outcome::Panicked(message)
                }
            },
        };
        self.finish(outcome);
    }

    fn finish(&self, outcome: Outcome) {
        let (dependents, completion, scheduler) = {
            let mut state = self.inner.state.lock();
            state.phase = Phase::Finished;
            state.outcome = Some(outcome);
            state.dependencies.clear();
            (
                mem::take(&mut state.dependents),
                state.completion.take(),
                state.scheduler.take(),
            )
        };
        self.inner.finished.notify_all();
        if let Some(completion) = completion {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(completion)) {
                warn!(
                    task = %self.id(),
                    message = %panic_message(payload.as_ref()),
                    "completion callback panicked"
                );
            }
        }
        for dependent in dependents {
            dependent.release();
        }
        if let Some(scheduler) = scheduler {
            scheduler.finished(self);
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}
