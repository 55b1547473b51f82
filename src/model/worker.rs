//! Workers: the anchors of task chains.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::task::TaskId;
use crate::directory::Identity;

/// Entity id of the fallback worker. Never used by a real identity.
pub const FALLBACK_WORKER_ID: &str = "planninguser";

/// A worker anchoring an ordered chain of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Stable numeric id derived from the entity id.
    pub id: u64,
    /// External entity id (user name in the identity directory).
    pub entity_id: String,
    /// Groups this worker belongs to.
    pub groups: BTreeSet<String>,
    /// Disabled workers receive no new work.
    pub enabled: bool,
    #[serde(skip)]
    pub(crate) first_task: Option<TaskId>,
}

impl Worker {
    pub fn new(entity_id: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        Self {
            id: stable_id(&entity_id),
            entity_id,
            groups: BTreeSet::new(),
            enabled: true,
            first_task: None,
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

    /// The always-eligible assignee, also anchor of the placeholder tasks.
    pub fn fallback() -> Self {
        Self::new(FALLBACK_WORKER_ID)
    }

    pub fn from_identity(identity: &Identity) -> Self {
        Self::new(identity.id.clone()).with_groups(identity.groups.iter().cloned())
    }

    pub fn is_fallback(&self) -> bool {
        self.entity_id == FALLBACK_WORKER_ID
    }

    /// Head of this worker's chain.
    pub fn first_task(&self) -> Option<TaskId> {
        self.first_task
    }

    /// Copy with the chain pointer cleared, as carried by change operations.
    pub fn detached(&self) -> Self {
        Self {
            first_task: None,
            ..self.clone()
        }
    }
}

pub fn is_fallback_worker(entity_id: &str) -> bool {
    entity_id == FALLBACK_WORKER_ID
}

/// FNV-1a, stable across runs and platforms.
fn stable_id(entity_id: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in entity_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
