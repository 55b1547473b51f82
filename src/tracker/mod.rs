//! Task-tracking system contract.

pub mod memory;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TrackerError;

pub use memory::{InMemoryTaskTracker, PublishCall};
pub use types::{
    PlanningRecord, PublishError, PublishErrorCode, PublishItem, PublishResult, TaskSnapshot,
    TaskStatus,
};

/// The external system of record for tasks.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    /// Tasks in any of `statuses`, modified at or after `since` when given.
    async fn fetch_tasks(
        &self,
        statuses: &[TaskStatus],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TaskSnapshot>, TrackerError>;

    /// Apply a plan. Item-level rejections come back in the result, not as `Err`.
    async fn publish(
        &self,
        items: &[PublishItem],
        on_behalf_of: &str,
    ) -> Result<PublishResult, TrackerError>;
}
