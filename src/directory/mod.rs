//! Identity and group directory.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DirectoryError;

/// A user known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            groups: BTreeSet::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_all_users(&self) -> Result<Vec<Identity>, DirectoryError>;

    async fn find_user(&self, id: &str) -> Result<Option<Identity>, DirectoryError>;
}

/// Directory backed by a map, editable at runtime.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<BTreeMap<String, Identity>>,
}

impl InMemoryDirectory {
    pub fn new(users: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().map(|u| (u.id.clone(), u)).collect()),
        }
    }

    pub async fn upsert(&self, identity: Identity) {
        self.users.write().await.insert(identity.id.clone(), identity);
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.users.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn list_all_users(&self) -> Result<Vec<Identity>, DirectoryError> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn find_user(&self, id: &str) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.users.read().await.get(id).cloned())
    }
}
