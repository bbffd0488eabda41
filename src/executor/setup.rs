use crate::config::QueueConfig;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;

/// Error kind for executor setup failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorSetupError {
    /// The worker threads could not be started.
    #[error("failed to start worker threads")]
    Workers(#[from] ThreadPoolBuildError),
}

/// Start one worker thread per concurrency slot.
///
/// The executor counts running tasks itself and never hands rayon more than
/// `max_concurrent` jobs at once, so workers never queue behind each other.
pub(super) fn spawn_workers(
    config: &QueueConfig,
    max_concurrent: usize,
) -> Result<ThreadPool, ExecutorSetupError> {
    let prefix = config.thread_name_prefix().to_owned();
    let workers = ThreadPoolBuilder::new()
        .num_threads(max_concurrent)
        .thread_name(move |index| format!("{prefix}-{index}"))
        .build()?;
    Ok(workers)
}
