use super::SubgroupRegistry;
use crate::task::{Schedule, Task};
use loom::{sync::Mutex, thread};
use std::sync::Arc;

/// Runs tasks on the thread that made them ready, so every chain is
/// explored under loom's scheduler instead of rayon's.
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
fn loom_concurrent_registration_on_one_key() {
    loom::model(|| {
        let registry = SubgroupRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let spawn = |label: &'static str| {
            let (registry, log) = (registry.clone(), log.clone());
            thread::spawn(move || {
                let task = Task::new(move || log.lock().unwrap().push(label));
                enqueue(&registry.register(task, "key"));
            })
        };
        let a = spawn("a");
        let b = spawn("b");
        a.join().unwrap();
        b.join().unwrap();

        // Neither task was lost, and every marker found its pair at the head.
        let mut log = log.lock().unwrap().clone();
        log.sort_unstable();
        assert_eq!(log, vec!["a", "b"]);
        assert!(registry.is_empty());
    });
}

#[test]
fn loom_registration_races_marker_cleanup() {
    loom::model(|| {
        let registry = SubgroupRegistry::new();
        let runs = Arc::new(Mutex::new(0_usize));
        let first = {
            let runs = runs.clone();
            Task::new(move || *runs.lock().unwrap() += 1)
        };
        let submission = registry.register(first, 7_u8);

        let worker = thread::spawn(move || enqueue(&submission));
        let second = {
            let runs = runs.clone();
            Task::new(move || *runs.lock().unwrap() += 1)
        };
        enqueue(&registry.register(second, 7));
        worker.join().unwrap();

        assert_eq!(*runs.lock().unwrap(), 2);
        assert!(!registry.contains(&7));
    });
}

#[test]
fn loom_snapshots_never_expose_markers() {
    loom::model(|| {
        let registry = SubgroupRegistry::new();
        let task = Task::new(|| {});
        let submission = registry.register(task.clone(), "key");

        let worker = thread::spawn(move || enqueue(&submission));
        let snapshot = registry.tasks(&"key");
        worker.join().unwrap();

        assert!(snapshot.is_empty() || snapshot == vec![task]);
        assert!(registry.tasks(&"key").is_empty());
    });
}
