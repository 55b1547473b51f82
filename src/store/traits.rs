//! `AssignmentStore` trait: last-known published assignment per task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::TaskId;
use crate::tracker::{PlanningRecord, PublishItem};

/// A persisted assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentRecord {
    pub task_id: TaskId,
    pub assigned_user: String,
    pub index: i32,
    pub visible: bool,
    pub updated_at: DateTime<Utc>,
}

impl AssignmentRecord {
    pub fn from_item(item: &PublishItem) -> Self {
        Self {
            task_id: item.task_id,
            assigned_user: item.assigned_user.clone(),
            index: item.index,
            visible: item.visible,
            updated_at: Utc::now(),
        }
    }

    pub fn planning(&self) -> PlanningRecord {
        PlanningRecord {
            assigned_user: self.assigned_user.clone(),
            index: self.index,
            visible: self.visible,
        }
    }
}

/// Optional durability layer for published plans.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn read_last_known(&self, task_id: TaskId)
    -> Result<Option<AssignmentRecord>, StoreError>;

    async fn upsert(&self, record: &AssignmentRecord) -> Result<(), StoreError>;

    /// Forget a task that left the working set.
    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError>;
}
