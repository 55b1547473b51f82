//! In-memory task tracker, used by the binary's seeded mode and by tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::TaskTracker;
use super::types::{
    PlanningRecord, PublishError, PublishErrorCode, PublishItem, PublishResult, TaskSnapshot,
    TaskStatus,
};
use crate::error::TrackerError;
use crate::model::TaskId;

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishCall {
    pub items: Vec<PublishItem>,
    pub on_behalf_of: String,
}

enum ScriptedPublish {
    Result(PublishResult),
    Transport(String),
}

/// Task tracker holding its tasks in memory.
///
/// Publishing stores the plan on each task and turns visible assignments of
/// open tasks into reservations, the way a real tracker would delegate them.
pub struct InMemoryTaskTracker {
    tasks: RwLock<BTreeMap<TaskId, TaskSnapshot>>,
    scripted: Mutex<VecDeque<ScriptedPublish>>,
    failing_fetches: AtomicUsize,
    calls: Mutex<Vec<PublishCall>>,
}

impl Default for InMemoryTaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskTracker {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            scripted: Mutex::new(VecDeque::new()),
            failing_fetches: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskSnapshot>) -> Self {
        Self {
            tasks: RwLock::new(tasks.into_iter().map(|t| (t.task_id, t)).collect()),
            ..Self::new()
        }
    }

    // ── Test / seeding helpers ──────────────────────────────────────

    /// Insert or replace a task, stamping it as modified now.
    pub async fn upsert_task(&self, mut snapshot: TaskSnapshot) {
        snapshot.last_modified = Utc::now();
        self.tasks.write().await.insert(snapshot.task_id, snapshot);
    }

    pub async fn task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Move a task to a new status and owner.
    pub async fn set_status(&self, id: TaskId, status: TaskStatus, owner: Option<&str>) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        task.status = status;
        task.actual_owner = owner.map(str::to_string);
        task.last_modified = Utc::now();
        true
    }

    pub async fn complete_task(&self, id: TaskId) -> bool {
        let owner = self.task(id).await.and_then(|t| t.actual_owner);
        self.set_status(id, TaskStatus::Completed, owner.as_deref())
            .await
    }

    /// Make the next `count` fetches fail with a transport error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Queue a result to return from the next publish instead of applying it.
    pub async fn script_publish(&self, result: PublishResult) {
        self.scripted
            .lock()
            .await
            .push_back(ScriptedPublish::Result(result));
    }

    /// Queue a transport failure for the next publish.
    pub async fn script_publish_failure(&self, message: impl Into<String>) {
        self.scripted
            .lock()
            .await
            .push_back(ScriptedPublish::Transport(message.into()));
    }

    pub async fn publish_calls(&self) -> Vec<PublishCall> {
        self.calls.lock().await.clone()
    }

    fn apply_item(task: &mut TaskSnapshot, item: &PublishItem) -> Result<(), PublishError> {
        if !task.status.is_active() {
            return Err(PublishError::new(
                PublishErrorCode::TaskModifiedSincePlanCalculation,
                format!("task is {}", task.status),
            )
            .for_task(item.task_id));
        }

        // An owner nobody planned means someone changed the task by hand.
        if let Some(owner) = task.owner() {
            let planned = task
                .planning
                .as_ref()
                .is_some_and(|p| p.assigned_user == owner);
            let locked = matches!(task.status, TaskStatus::InProgress | TaskStatus::Suspended);
            if owner != item.assigned_user && (!planned || locked) {
                return Err(PublishError::new(
                    PublishErrorCode::TaskModifiedSincePlanCalculation,
                    format!("task is owned by {owner}"),
                )
                .for_task(item.task_id));
            }
        }

        task.planning = Some(PlanningRecord {
            assigned_user: item.assigned_user.clone(),
            index: item.index,
            visible: item.visible,
        });
        if item.visible && matches!(task.status, TaskStatus::Ready | TaskStatus::Reserved) {
            task.status = TaskStatus::Reserved;
            task.actual_owner = Some(item.assigned_user.clone());
        }
        task.last_modified = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TaskTracker for InMemoryTaskTracker {
    async fn fetch_tasks(
        &self,
        statuses: &[TaskStatus],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TaskSnapshot>, TrackerError> {
        let remaining = self.failing_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_fetches.store(remaining - 1, Ordering::SeqCst);
            return Err(TrackerError::Transport("simulated fetch failure".to_string()));
        }

        let tasks = self.tasks.read().await;
        let result: Vec<TaskSnapshot> = tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .filter(|t| since.is_none_or(|since| t.last_modified >= since))
            .cloned()
            .collect();
        debug!(count = result.len(), since = ?since, "Fetched tasks");
        Ok(result)
    }

    async fn publish(
        &self,
        items: &[PublishItem],
        on_behalf_of: &str,
    ) -> Result<PublishResult, TrackerError> {
        self.calls.lock().await.push(PublishCall {
            items: items.to_vec(),
            on_behalf_of: on_behalf_of.to_string(),
        });

        if let Some(scripted) = self.scripted.lock().await.pop_front() {
            return match scripted {
                ScriptedPublish::Result(result) => Ok(result),
                ScriptedPublish::Transport(message) => Err(TrackerError::Transport(message)),
            };
        }

        let mut tasks = self.tasks.write().await;
        let mut result = PublishResult::ok();
        for item in items {
            let outcome = match tasks.get_mut(&item.task_id) {
                Some(task) => Self::apply_item(task, item),
                None => Err(PublishError::new(
                    PublishErrorCode::TaskModifiedSincePlanCalculation,
                    "task no longer exists",
                )
                .for_task(item.task_id)),
            };
            if let Err(e) = outcome {
                result.item_errors.push(e);
            }
        }
        info!(
            items = items.len(),
            errors = result.item_errors.len(),
            user = %on_behalf_of,
            "Plan published"
        );
        Ok(result)
    }
}
