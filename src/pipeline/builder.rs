//! Recovery: build an initial solution from a full snapshot and the roster.
//!
//! Open tasks start unassigned. Owned tasks are grouped by owner and chained
//! in a deterministic order:
//!
//! - pinned before unpinned
//! - within each class, known indices ascending, then unknown ones
//! - ties keep snapshot order
//!
//! A task is pinned when it is in progress or the last published plan made it
//! visible. Its last-known index is kept only when that plan named the same
//! owner.

use std::collections::HashMap;

use tracing::{debug, info};

use super::changes::task_from_snapshot;
use crate::directory::Identity;
use crate::error::ModelError;
use crate::model::{Solution, TaskId, Worker, is_fallback_worker};
use crate::tracker::{TaskSnapshot, TaskStatus};

/// A task waiting to be chained to its owner.
#[derive(Debug, Clone, Copy)]
struct OwnedTask {
    id: TaskId,
    index: i32,
    pinned: bool,
}

impl OwnedTask {
    fn sort_key(&self) -> (bool, bool, i32) {
        (!self.pinned, self.index < 0, self.index.max(0))
    }
}

/// Insert keeping the chain order described in the module docs.
fn add_in_order(owned: &mut Vec<OwnedTask>, task: OwnedTask) {
    let key = task.sort_key();
    let at = owned.partition_point(|t| t.sort_key() <= key);
    owned.insert(at, task);
}

pub fn build_initial_solution(
    snapshot: &[TaskSnapshot],
    roster: &[Identity],
) -> Result<Solution, ModelError> {
    let mut solution = Solution::new();
    for identity in roster.iter().filter(|i| !is_fallback_worker(&i.id)) {
        solution.add_worker(Worker::from_identity(identity));
    }

    let mut by_owner: HashMap<String, Vec<OwnedTask>> = HashMap::new();
    for item in snapshot.iter().filter(|s| !s.task_id.is_reserved()) {
        match item.status {
            TaskStatus::Ready => {
                solution.add_task(task_from_snapshot(item));
            }
            TaskStatus::Reserved | TaskStatus::InProgress | TaskStatus::Suspended => {
                let Some(owner) = item.owner() else {
                    continue;
                };
                let mut task = task_from_snapshot(item);
                let (pinned, index) = match &item.planning {
                    Some(plan) => {
                        let pinned = item.status == TaskStatus::InProgress || plan.visible;
                        let index = if plan.assigned_user == owner { plan.index } else { -1 };
                        (pinned, index)
                    }
                    None => (item.status == TaskStatus::InProgress, -1),
                };
                task.set_pinned(pinned);
                solution.add_task(task);
                add_in_order(
                    by_owner.entry(owner.to_string()).or_default(),
                    OwnedTask { id: item.task_id, index, pinned },
                );
            }
            _ => {}
        }
    }

    let mut owners: Vec<(String, Vec<OwnedTask>)> = by_owner.into_iter().collect();
    owners.sort_by(|a, b| a.0.cmp(&b.0));
    for (owner, tasks) in owners {
        if solution.worker(&owner).is_none() {
            // Owner left the roster: let the optimizer place the work again.
            debug!(worker = %owner, tasks = tasks.len(), "Owner not in roster, tasks left unassigned");
            for owned in &tasks {
                if let Some(task) = solution.task_mut(owned.id) {
                    task.set_pinned(false);
                }
            }
            continue;
        }
        for owned in tasks {
            solution.append(owned.id, &owner)?;
        }
    }

    solution.ensure_placeholders()?;
    info!(
        solution_id = %solution.id(),
        tasks = solution.real_task_count(),
        workers = solution.workers().count(),
        "Initial solution built"
    );
    Ok(solution)
}
