//! Map-backed assignment store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{AssignmentRecord, AssignmentStore};
use crate::error::StoreError;
use crate::model::TaskId;

#[derive(Default)]
pub struct InMemoryAssignmentStore {
    records: RwLock<HashMap<TaskId, AssignmentRecord>>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn read_last_known(
        &self,
        task_id: TaskId,
    ) -> Result<Option<AssignmentRecord>, StoreError> {
        Ok(self.records.read().await.get(&task_id).cloned())
    }

    async fn upsert(&self, record: &AssignmentRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.task_id, record.clone());
        Ok(())
    }

    async fn delete(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.records.write().await.remove(&task_id);
        Ok(())
    }
}
