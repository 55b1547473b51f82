//! Types passed between the synchronizer, processor and coordinator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::directory::Identity;
use crate::model::Solution;
use crate::tracker::{PublishResult, TaskSnapshot};

/// One synchronizer read, handed to the coordinator.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// When the read started. Results older than the last publish completion
    /// are stale and ignored.
    pub read_start: DateTime<Utc>,
    /// Full view of the active tasks after merging the incremental read.
    pub snapshot: Vec<TaskSnapshot>,
    /// Directory entries for owners unknown to the current roster.
    pub identities: HashMap<String, Identity>,
    /// Full roster, present only on roster refresh ticks.
    pub roster: Option<Vec<Identity>>,
}

impl SyncResult {
    pub fn new(read_start: DateTime<Utc>, snapshot: Vec<TaskSnapshot>) -> Self {
        Self {
            read_start,
            snapshot,
            identities: HashMap::new(),
            roster: None,
        }
    }

    pub fn with_roster(mut self, roster: Vec<Identity>) -> Self {
        self.roster = Some(roster);
        self
    }
}

/// How processing a solution ended.
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// The publish call returned; the result may still carry errors.
    Published { result: PublishResult, items: usize },
    /// The publish call never reached the tracker.
    TransportFailed(String),
    /// Processing itself failed.
    Failed(String),
}

/// Report from the processor for one solution.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub solution_id: Uuid,
    pub solution: Arc<Solution>,
    pub outcome: ProcessingOutcome,
}

impl ProcessingResult {
    /// The current solution can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        match &self.outcome {
            ProcessingOutcome::Published { result, .. } => result.is_fatal(),
            ProcessingOutcome::TransportFailed(_) => false,
            ProcessingOutcome::Failed(_) => true,
        }
    }

    /// Nothing was applied; the same solution may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self.outcome, ProcessingOutcome::TransportFailed(_))
    }
}
