use crate::{
    sync::{Condvar, Mutex},
    task::{Schedule, Task},
};
use derive_more::Debug;
use rayon::ThreadPool;
use std::collections::VecDeque;

/// State shared between the executor handles and every submitted task.
#[derive(Debug)]
pub(super) struct Shared {
    #[debug(skip)]
    pub(super) workers: ThreadPool,
    pub(super) max_concurrent: usize,
    pub(super) state: Mutex<ExecState>,
    /// Signalled whenever `outstanding` drops to zero.
    pub(super) idle: Condvar,
}

#[derive(Debug, Default)]
pub(super) struct ExecState {
    pub(super) suspended: bool,
    /// Tasks whose dependencies are finished, in readiness order.
    pub(super) ready: VecDeque<Task>,
    /// Tasks handed to a worker and not finished yet.
    pub(super) running: usize,
    /// Submitted tasks not finished yet, whatever their phase.
    pub(super) outstanding: usize,
}

impl Shared {
    /// Pop as many ready tasks as the limit allows. The caller starts them
    /// after releasing the lock.
    pub(super) fn take_startable(&self, state: &mut ExecState) -> Vec<Task> {
        let mut startable = Vec::new();
        while !state.suspended && state.running < self.max_concurrent {
            let Some(task) = state.ready.pop_front() else {
                break;
            };
            state.running += 1;
            startable.push(task);
        }
        startable
    }

    pub(super) fn start(&self, tasks: Vec<Task>) {
        for task in tasks {
            self.workers.spawn(move || task.run());
        }
    }
}

impl Schedule for Shared {
    fn schedule(&self, task: Task) {
        let startable = {
            let mut state = self.state.lock();
            state.ready.push_back(task);
            self.take_startable(&mut state)
        };
        self.start(startable);
    }

    fn finished(&self, _task: &Task) {
        let startable = {
            let mut state = self.state.lock();
            state.running = state.running.checked_sub(1).expect("Shared::finished: [1]");
            state.outstanding = state
                .outstanding
                .checked_sub(1)
                .expect("Shared::finished: [2]");
            if state.outstanding == 0 {
                self.idle.notify_all();
            }
            self.take_startable(&mut state)
        };
        self.start(startable);
    }
}
