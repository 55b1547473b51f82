//! Task-tracking system data: snapshots read from it and items published to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{OrganizationalEntity, TaskId};

/// Status of a task in the tracking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    /// Open, nobody owns it.
    Ready,
    /// Claimed by (or delegated to) an owner, work not begun.
    Reserved,
    InProgress,
    /// On hold. May or may not keep an owner.
    Suspended,
    Completed,
    Failed,
    Error,
    Exited,
    Obsolete,
}

impl TaskStatus {
    /// Statuses the assigner keeps in its working set.
    pub const ACTIVE: [TaskStatus; 4] = [
        TaskStatus::Ready,
        TaskStatus::Reserved,
        TaskStatus::InProgress,
        TaskStatus::Suspended,
    ];

    /// Every status, used by incremental reads so that terminations are seen.
    pub const ALL: [TaskStatus; 10] = [
        TaskStatus::Created,
        TaskStatus::Ready,
        TaskStatus::Reserved,
        TaskStatus::InProgress,
        TaskStatus::Suspended,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Error,
        TaskStatus::Exited,
        TaskStatus::Obsolete,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Error | Self::Exited | Self::Obsolete
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::InProgress => "in_progress",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Exited => "exited",
            Self::Obsolete => "obsolete",
        };
        write!(f, "{s}")
    }
}

/// Last plan published for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningRecord {
    pub assigned_user: String,
    /// Position in the assigned user's chain; negative when unknown.
    pub index: i32,
    pub visible: bool,
}

/// A task as read from the tracking system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub process_instance_id: i64,
    #[serde(default)]
    pub process_id: String,
    pub container_id: String,
    #[serde(default)]
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub actual_owner: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub potential_owners: Vec<OrganizationalEntity>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub planning: Option<PlanningRecord>,
}

impl TaskSnapshot {
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            process_instance_id: 0,
            process_id: String::new(),
            container_id: String::new(),
            name: format!("task-{task_id}"),
            status,
            actual_owner: None,
            priority: 0,
            potential_owners: Vec::new(),
            last_modified: Utc::now(),
            planning: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.actual_owner = Some(owner.into());
        self
    }

    pub fn with_potential_owners<I>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = OrganizationalEntity>,
    {
        self.potential_owners = owners.into_iter().collect();
        self
    }

    pub fn with_planning(mut self, planning: PlanningRecord) -> Self {
        self.planning = Some(planning);
        self
    }

    /// Owner, if the status class carries one.
    pub fn owner(&self) -> Option<&str> {
        match self.status {
            TaskStatus::Reserved | TaskStatus::InProgress | TaskStatus::Suspended => {
                self.actual_owner.as_deref().filter(|o| !o.is_empty())
            }
            _ => None,
        }
    }
}

/// One assignment to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishItem {
    pub container_id: String,
    pub task_id: TaskId,
    pub process_instance_id: i64,
    pub assigned_user: String,
    pub index: i32,
    pub visible: bool,
}

/// Error codes returned by a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishErrorCode {
    /// The task changed after the plan was computed. The next sync corrects it.
    TaskModifiedSincePlanCalculation,
    UnexpectedError,
}

impl PublishErrorCode {
    /// The only decision point for publish error severity, used for both
    /// batch-level and per-item codes.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TaskModifiedSincePlanCalculation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishError {
    pub code: PublishErrorCode,
    pub message: String,
    #[serde(default)]
    pub task_id: Option<TaskId>,
}

impl PublishError {
    pub fn new(code: PublishErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            task_id: None,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.task_id {
            Some(id) => write!(f, "{:?} on task {id}: {}", self.code, self.message),
            None => write!(f, "{:?}: {}", self.code, self.message),
        }
    }
}

/// Outcome of a publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    /// Whole-batch failure.
    #[serde(default)]
    pub error: Option<PublishError>,
    /// Per-item failures; the remaining items were applied.
    #[serde(default)]
    pub item_errors: Vec<PublishError>,
}

impl PublishResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn batch_error(error: PublishError) -> Self {
        Self {
            error: Some(error),
            item_errors: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.item_errors.is_empty()
    }

    /// Any batch or item error that is not recoverable.
    pub fn is_fatal(&self) -> bool {
        self.error
            .iter()
            .chain(&self.item_errors)
            .any(|e| !e.code.is_recoverable())
    }

    /// Whether the item for `task_id` was applied.
    pub fn applied(&self, task_id: TaskId) -> bool {
        self.error.is_none() && !self.item_errors.iter().any(|e| e.task_id == Some(task_id))
    }
}
