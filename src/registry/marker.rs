use crate::{
    registry::Groups,
    task::Task,
    types::{SubgroupKey, TaskId},
};
use std::sync::Weak;
use tracing::{error, trace, warn};

/// Build the zero-work task that removes `task` and itself from the head of
/// subgroup `key` once `task` finished.
///
/// The marker only holds a weak handle to the registry state.
pub(super) fn for_task<K: SubgroupKey>(task: &Task, key: K, groups: Weak<Groups<K>>) -> Task {
    let task_id = task.id();
    let marker_id = TaskId::next();
    let marker = Task::marker(marker_id, move || {
        let Some(groups) = groups.upgrade() else {
            warn!(?key, task = %task_id, "subgroup registry dropped before its marker fired");
            return;
        };
        complete(&groups, &key, task_id, marker_id);
    });
    marker.add_dependency(task);
    marker
}

/// # Panics
/// If the subgroup is missing or the pair is not at its head. Either means
/// tasks finished out of order, and the bookkeeping can no longer be trusted.
pub(super) fn complete<K: SubgroupKey>(
    groups: &Groups<K>,
    key: &K,
    task_id: TaskId,
    marker_id: TaskId,
) {
    let mut groups = groups.lock();
    let Some(group) = groups.get_mut(key) else {
        error!(?key, task = %task_id, "finished task has no subgroup");
        panic!("subgroup {key:?} must exist until its last task finishes");
    };
    let at_head = matches!(
        (group.front(), group.get(1)),
        (Some(first), Some(second)) if first.id() == task_id && second.id() == marker_id
    );
    if !at_head {
        error!(
            ?key,
            task = %task_id,
            marker = %marker_id,
            "finished task is not at the subgroup head"
        );
        panic!("{task_id} and its marker {marker_id} must head subgroup {key:?}");
    }
    if group.len() == 2 {
        groups.remove(key);
        trace!(?key, "subgroup drained");
    } else {
        group.pop_front();
        group.pop_front();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::complete;
    use crate::{
        registry::Groups,
        sync::Mutex,
        task::Task,
        types::{HashMap, TaskId},
    };
    use std::collections::VecDeque;

    fn groups_with(key: &'static str, tasks: &[Task]) -> Groups<&'static str> {
        let mut map = HashMap::default();
        map.insert(key, tasks.iter().cloned().collect::<VecDeque<_>>());
        Mutex::new(map)
    }

    #[test]
    fn removes_head_pair_and_then_the_key() {
        let (first, first_marker) = (Task::new(|| {}), Task::marker(TaskId::next(), || {}));
        let (second, second_marker) = (Task::new(|| {}), Task::marker(TaskId::next(), || {}));
        let groups = groups_with(
            "k",
            &[first.clone(), first_marker.clone(), second.clone(), second_marker.clone()],
        );

        complete(&groups, &"k", first.id(), first_marker.id());
        assert_eq!(
            groups.lock()["k"].iter().cloned().collect::<Vec<_>>(),
            vec![second.clone(), second_marker.clone()]
        );

        complete(&groups, &"k", second.id(), second_marker.id());
        assert!(groups.lock().is_empty());
    }

    #[test]
    #[should_panic(expected = "must exist until its last task finishes")]
    fn missing_subgroup_is_fatal() {
        let groups: Groups<&'static str> = Mutex::new(HashMap::default());
        complete(&groups, &"k", TaskId::next(), TaskId::next());
    }

    #[test]
    #[should_panic(expected = "must head subgroup")]
    fn out_of_order_completion_is_fatal() {
        let (first, first_marker) = (Task::new(|| {}), Task::marker(TaskId::next(), || {}));
        let (second, second_marker) = (Task::new(|| {}), Task::marker(TaskId::next(), || {}));
        let groups = groups_with(
            "k",
            &[first, first_marker, second.clone(), second_marker.clone()],
        );
        complete(&groups, &"k", second.id(), second_marker.id());
    }
}
