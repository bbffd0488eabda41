use core::num::NonZeroUsize;

const DEFAULT_THREAD_NAME: &str = "subgroup-worker";

/// Settings for the execution pool behind a queue.
///
/// Built with chained setters:
///
/// ```
/// use core::num::NonZeroUsize;
/// use subgroup_queue::config::QueueConfig;
///
/// let config = QueueConfig::default()
///     .max_concurrent_tasks(NonZeroUsize::new(4).unwrap())
///     .thread_name("ingest")
///     .start_suspended(true);
/// assert_eq!(config.resolved_max_concurrent_tasks(), 4);
/// ```
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    max_concurrent_tasks: Option<NonZeroUsize>,
    thread_name: String,
    start_suspended: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            start_suspended: false,
        }
    }
}

impl QueueConfig {
    /// Upper bound on tasks running at the same time.
    ///
    /// Queues with subgroups must stay concurrent: a limit of one turns every
    /// key into the same serial lane.
    pub fn max_concurrent_tasks(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrent_tasks = Some(limit);
        self
    }

    /// Prefix of worker thread names; threads are named `{prefix}-{index}`.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Whether the pool starts suspended.
    pub fn start_suspended(mut self, suspended: bool) -> Self {
        self.start_suspended = suspended;
        self
    }

    /// The concurrency limit, falling back to the machine's available
    /// parallelism (never below two).
    #[must_use]
    pub fn resolved_max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks.map_or_else(
            || {
                std::thread::available_parallelism()
                    .map_or(2, NonZeroUsize::get)
                    .max(2)
            },
            NonZeroUsize::get,
        )
    }

    #[must_use]
    pub(crate) fn thread_name_prefix(&self) -> &str {
        &self.thread_name
    }

    #[must_use]
    pub(crate) fn is_start_suspended(&self) -> bool {
        self.start_suspended
    }
}
