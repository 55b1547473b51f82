//! Placeholder tasks.
//!
//! The optimizer's working set must never be empty, and must never consist
//! only of pinned tasks. Two synthetic tasks that only the fallback worker may
//! hold, and that can never be pinned, guarantee both. Their ids come from the
//! reserved negative range and are never used by real tasks; they never reach
//! the task tracker.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::entity::OrganizationalEntity;
use super::task::{Task, TaskId};
use super::worker::FALLBACK_WORKER_ID;

pub const PLACEHOLDER_ID: TaskId = TaskId(-1);
pub const SECONDARY_PLACEHOLDER_ID: TaskId = TaskId(-2);

/// Both placeholder ids, in the order they are restored.
pub const PLACEHOLDER_IDS: [TaskId; 2] = [PLACEHOLDER_ID, SECONDARY_PLACEHOLDER_ID];

const PLACEHOLDER_PRIORITY: i32 = 10;

static PLACEHOLDER: LazyLock<Task> = LazyLock::new(|| build(PLACEHOLDER_ID, "placeholder"));

static SECONDARY_PLACEHOLDER: LazyLock<Task> =
    LazyLock::new(|| build(SECONDARY_PLACEHOLDER_ID, "placeholder-secondary"));

fn build(id: TaskId, name: &str) -> Task {
    let mut owners = BTreeSet::new();
    owners.insert(OrganizationalEntity::Worker(FALLBACK_WORKER_ID.to_string()));
    Task::new(id, name, PLACEHOLDER_PRIORITY)
        .with_process("placeholder-container", "placeholder-process", -1)
        .with_potential_owners(owners)
}

/// Fresh, unlinked copy of the placeholder with the given id.
pub fn placeholder(id: TaskId) -> Option<Task> {
    match id {
        PLACEHOLDER_ID => Some(PLACEHOLDER.clone()),
        SECONDARY_PLACEHOLDER_ID => Some(SECONDARY_PLACEHOLDER.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Worker;

    #[test]
    fn placeholders_only_accept_fallback() {
        let task = placeholder(PLACEHOLDER_ID).unwrap();
        assert!(task.accepts(&Worker::fallback()));
        assert!(!task.accepts(&Worker::new("alice")));
        assert!(task.is_placeholder());
    }

    #[test]
    fn unknown_ids_are_not_placeholders() {
        assert!(placeholder(TaskId(7)).is_none());
        assert!(placeholder(SECONDARY_PLACEHOLDER_ID).is_some_and(|t| t.is_placeholder()));
    }
}
