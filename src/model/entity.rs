//! Organizational entities: the worker-or-group potential owners of a task.

use serde::{Deserialize, Serialize};

use super::worker::Worker;

/// A potential owner of a task, either a single worker or a group of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OrganizationalEntity {
    Worker(String),
    Group(String),
}

impl OrganizationalEntity {
    /// External entity id of the worker or group.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Worker(id) | Self::Group(id) => id,
        }
    }

    /// Whether `worker` is this entity or a member of it.
    pub fn includes(&self, worker: &Worker) -> bool {
        match self {
            Self::Worker(id) => *id == worker.entity_id,
            Self::Group(id) => worker.groups.contains(id),
        }
    }
}

impl std::fmt::Display for OrganizationalEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker(id) => write!(f, "worker:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}
