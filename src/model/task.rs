//! Tasks: the planning entities linked into per-worker chains.
//!
//! A task's position is given by its predecessor, which is either the anchoring
//! worker or another task:
//!
//! ```text
//! alice <- A <- B <- C
//! bob   <- D
//! ```
//!
//! `owner`, `start_time` and `end_time` are derived from that link and are only
//! ever written by [`Solution`](super::Solution) while relinking.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::entity::OrganizationalEntity;
use super::worker::Worker;

/// Duration of every task, in abstract time units.
pub const DEFAULT_DURATION: i64 = 1;

/// Task identifier. Negative ids are reserved for placeholder tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Whether this id lies in the range reserved for placeholders.
    pub fn is_reserved(&self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immediate predecessor of a task in its chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predecessor {
    /// The task heads the chain of this worker.
    Worker(String),
    /// The task follows this task.
    Task(TaskId),
}

/// A unit of work to be kept assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub process_instance_id: i64,
    pub process_id: String,
    pub container_id: String,
    pub name: String,
    pub priority: i32,
    pub potential_owners: BTreeSet<OrganizationalEntity>,
    pub(crate) duration: i64,
    pub(crate) pinned: bool,
    pub(crate) previous: Option<Predecessor>,
    pub(crate) next: Option<TaskId>,
    pub(crate) owner: Option<String>,
    pub(crate) start_time: Option<i64>,
    pub(crate) end_time: Option<i64>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, priority: i32) -> Self {
        Self {
            id,
            process_instance_id: 0,
            process_id: String::new(),
            container_id: String::new(),
            name: name.into(),
            priority,
            potential_owners: BTreeSet::new(),
            duration: DEFAULT_DURATION,
            pinned: false,
            previous: None,
            next: None,
            owner: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_process(
        mut self,
        container_id: impl Into<String>,
        process_id: impl Into<String>,
        process_instance_id: i64,
    ) -> Self {
        self.container_id = container_id.into();
        self.process_id = process_id.into();
        self.process_instance_id = process_instance_id;
        self
    }

    pub fn with_potential_owners<I>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = OrganizationalEntity>,
    {
        self.potential_owners = owners.into_iter().collect();
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration.max(0);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_reserved()
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    /// Placeholders can never be pinned; the call is ignored for them.
    pub fn set_pinned(&mut self, pinned: bool) {
        if !self.is_placeholder() {
            self.pinned = pinned;
        }
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn previous(&self) -> Option<&Predecessor> {
        self.previous.as_ref()
    }

    pub fn next(&self) -> Option<TaskId> {
        self.next
    }

    /// Entity id of the worker anchoring this task's chain.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_assigned(&self) -> bool {
        self.previous.is_some()
    }

    pub fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<i64> {
        self.end_time
    }

    /// Whether `worker` may hold this task: the fallback worker always may,
    /// anyone else must be a potential owner directly or through a group.
    pub fn accepts(&self, worker: &Worker) -> bool {
        if worker.is_fallback() {
            return true;
        }
        self.potential_owners.iter().any(|entity| entity.includes(worker))
    }

    /// Copy with every chain link and derived attribute cleared.
    pub fn detached(&self) -> Self {
        Self {
            previous: None,
            next: None,
            owner: None,
            start_time: None,
            end_time: None,
            ..self.clone()
        }
    }
}
