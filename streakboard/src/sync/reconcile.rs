//! Pure merge functions for the local task list.
//!
//! Every function here is idempotent: applying the same event or the
//! same snapshot twice leaves the list exactly as applying it once.
//! The list is ordered newest first; new entries go to the front.

use std::collections::HashSet;

use streakboard_proto::event::ChangeEvent;
use streakboard_proto::task::{Task, TaskId};

/// Returns the index of the task with `id`.
#[must_use]
pub fn position(tasks: &[Task], id: &TaskId) -> Option<usize> {
    tasks.iter().position(|t| t.id == *id)
}

/// Removes the task with `id`, returning its former index and value.
pub fn remove_task(tasks: &mut Vec<Task>, id: &TaskId) -> Option<(usize, Task)> {
    let pos = position(tasks, id)?;
    Some((pos, tasks.remove(pos)))
}

/// Applies one change-feed event.
///
/// - insert: added at the front only if the id is absent
/// - update: replaces the task with the same id wholesale; ignored if absent
/// - delete: removes the task with the id if present
///
/// Returns `true` if the list changed.
pub fn apply_event(tasks: &mut Vec<Task>, event: &ChangeEvent) -> bool {
    match event {
        ChangeEvent::Insert(task) => {
            if position(tasks, &task.id).is_some() {
                return false;
            }
            tasks.insert(0, task.clone());
            true
        }
        ChangeEvent::Update(task) => match position(tasks, &task.id) {
            Some(pos) if tasks[pos] != *task => {
                tasks[pos] = task.clone();
                true
            }
            _ => false,
        },
        ChangeEvent::Delete { id } => remove_task(tasks, id).is_some(),
    }
}

/// Swaps the temporary entry `temp_id` for the store-confirmed row.
///
/// If the change feed already delivered the confirmed row (the insert
/// event can beat the insert response), the temporary entry is dropped
/// and the existing row is refreshed, leaving exactly one entry.
pub fn confirm_create(tasks: &mut Vec<Task>, temp_id: &TaskId, stored: Task) {
    if let Some(existing) = position(tasks, &stored.id) {
        tasks[existing] = stored;
        remove_task(tasks, temp_id);
        return;
    }
    match position(tasks, temp_id) {
        Some(pos) => tasks[pos] = stored,
        None => tasks.insert(0, stored),
    }
}

/// Writes the settled value of task `id` into the list.
///
/// `Some` replaces the entry in place, or inserts it at `fallback`
/// (clamped to the list length) when absent. `None` removes the entry.
/// Returns `true` if the list changed.
pub fn place_task(tasks: &mut Vec<Task>, id: &TaskId, value: Option<Task>, fallback: usize) -> bool {
    match (position(tasks, id), value) {
        (Some(pos), Some(task)) => {
            if tasks[pos] == task {
                return false;
            }
            tasks[pos] = task;
            true
        }
        (Some(pos), None) => {
            tasks.remove(pos);
            true
        }
        (None, Some(task)) => {
            tasks.insert(fallback.min(tasks.len()), task);
            true
        }
        (None, None) => false,
    }
}

/// Replaces the local list with a fetched snapshot, matched by id.
///
/// Entries for which `keep_local` returns `true` keep their local value
/// whether or not the snapshot lists them: an in-flight update stays
/// applied, an in-flight delete stays removed, and a write that settled
/// after the snapshot was taken is not undone by it. Unconfirmed creates
/// (temporary ids) and local-only kept entries stay at the front.
/// Duplicate ids in the snapshot collapse to the first one.
pub fn reconcile_snapshot<P>(tasks: &mut Vec<Task>, snapshot: Vec<Task>, keep_local: P)
where
    P: Fn(&TaskId) -> bool,
{
    let listed: HashSet<TaskId> = snapshot.iter().map(|t| t.id).collect();
    let mut merged: Vec<Task> = tasks
        .iter()
        .filter(|t| t.id.is_temporary() || (keep_local(&t.id) && !listed.contains(&t.id)))
        .cloned()
        .collect();
    let mut seen: HashSet<TaskId> = merged.iter().map(|t| t.id).collect();

    for remote in snapshot {
        if !seen.insert(remote.id) {
            continue;
        }
        if keep_local(&remote.id) {
            if let Some(pos) = position(tasks, &remote.id) {
                merged.push(tasks[pos].clone());
            }
        } else {
            merged.push(remote);
        }
    }

    *tasks = merged;
}
