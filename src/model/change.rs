//! Structural change operations and their application to a [`Solution`].
//!
//! Change batches are produced by the change builder and applied only by the
//! optimizer's own context. Application is lenient: an operation that refers
//! to a task already gone (removed earlier in the same batch, say) is skipped.

use tracing::debug;

use super::solution::Solution;
use super::task::{Task, TaskId};
use super::worker::Worker;
use crate::error::ModelError;

/// A single structural change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    /// Add an unassigned task.
    AddTask(Task),
    /// Assign a task (adding it if unknown) to a worker (adding it if unknown).
    /// `pin` marks the assignment as already externally visible.
    AssignTask { task: Task, worker: Worker, pin: bool },
    /// Unassign a task and clear its pin.
    ReleaseTask(TaskId),
    /// Drop a task from the working set.
    RemoveTask(TaskId),
    AddWorker(Worker),
    /// Refresh groups and the enabled flag of a known worker.
    UpdateWorker(Worker),
    /// Stop giving work to a worker no longer in the roster.
    DisableWorker(String),
}

impl ChangeOp {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AddTask(_) => "add_task",
            Self::AssignTask { .. } => "assign_task",
            Self::ReleaseTask(_) => "release_task",
            Self::RemoveTask(_) => "remove_task",
            Self::AddWorker(_) => "add_worker",
            Self::UpdateWorker(_) => "update_worker",
            Self::DisableWorker(_) => "disable_worker",
        }
    }

    /// Task the operation targets, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::AddTask(task) | Self::AssignTask { task, .. } => Some(task.id),
            Self::ReleaseTask(id) | Self::RemoveTask(id) => Some(*id),
            Self::AddWorker(_) | Self::UpdateWorker(_) | Self::DisableWorker(_) => None,
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AssignTask { task, worker, pin } => write!(
                f,
                "assign_task({} -> {}, pin={pin})",
                task.id, worker.entity_id
            ),
            Self::AddWorker(w) | Self::UpdateWorker(w) => {
                write!(f, "{}({})", self.label(), w.entity_id)
            }
            Self::DisableWorker(id) => write!(f, "disable_worker({id})"),
            other => match other.task_id() {
                Some(id) => write!(f, "{}({id})", other.label()),
                None => write!(f, "{}", other.label()),
            },
        }
    }
}

impl Solution {
    /// Apply every operation in order.
    pub fn apply_changes(&mut self, changes: &[ChangeOp]) -> Result<(), ModelError> {
        for change in changes {
            self.apply_change(change)?;
        }
        Ok(())
    }

    pub fn apply_change(&mut self, change: &ChangeOp) -> Result<(), ModelError> {
        match change {
            ChangeOp::AddTask(task) => {
                if !self.add_task(task.clone()) {
                    debug!(task_id = %task.id, "Task already present, add skipped");
                }
                Ok(())
            }
            ChangeOp::AssignTask { task, worker, pin } => self.assign(task, worker, *pin),
            ChangeOp::ReleaseTask(id) => {
                if !self.contains_task(*id) {
                    debug!(task_id = %id, "Task already gone, release skipped");
                    return Ok(());
                }
                self.relink(*id, None)?;
                if let Some(task) = self.task_mut(*id) {
                    task.set_pinned(false);
                }
                Ok(())
            }
            ChangeOp::RemoveTask(id) => {
                if id.is_reserved() {
                    return Err(ModelError::ImmutablePlaceholder(*id));
                }
                let Some(owner) = self.task(*id).map(|t| t.owner.clone()) else {
                    debug!(task_id = %id, "Task already gone, remove skipped");
                    return Ok(());
                };
                self.remove_task(*id);
                if let Some(owner) = owner {
                    self.drop_if_retired(&owner)?;
                }
                Ok(())
            }
            ChangeOp::AddWorker(worker) => {
                self.add_worker(worker.clone());
                Ok(())
            }
            ChangeOp::UpdateWorker(worker) => {
                self.add_worker(worker.clone());
                if !worker.enabled {
                    self.retire_worker(&worker.entity_id)?;
                }
                Ok(())
            }
            ChangeOp::DisableWorker(entity_id) => {
                let Some(worker) = self.worker_mut(entity_id) else {
                    debug!(worker = %entity_id, "Worker already gone, disable skipped");
                    return Ok(());
                };
                if worker.is_fallback() {
                    return Ok(());
                }
                worker.enabled = false;
                self.retire_worker(entity_id)
            }
        }
    }

    fn assign(&mut self, task: &Task, worker: &Worker, pin: bool) -> Result<(), ModelError> {
        if task.is_placeholder() && !worker.is_fallback() {
            return Err(ModelError::ImmutablePlaceholder(task.id));
        }
        if self.worker(&worker.entity_id).is_none() {
            self.add_worker(worker.clone());
        }
        self.add_task(task.clone());
        self.relink(task.id, None)?;
        if let Some(existing) = self.task_mut(task.id) {
            existing.set_pinned(pin);
        }
        if pin {
            self.insert_after_pinned(task.id, &worker.entity_id)
        } else {
            self.append(task.id, &worker.entity_id)
        }
    }

    /// Release the unpinned tasks of a disabled worker and drop it once its
    /// chain is empty.
    fn retire_worker(&mut self, entity_id: &str) -> Result<(), ModelError> {
        let unpinned: Vec<TaskId> = self
            .chain(entity_id)
            .filter(|t| !t.pinned)
            .map(|t| t.id)
            .collect();
        for id in unpinned {
            self.relink(id, None)?;
        }
        self.drop_if_retired(entity_id)
    }

    fn drop_if_retired(&mut self, entity_id: &str) -> Result<(), ModelError> {
        let retired = self
            .worker(entity_id)
            .is_some_and(|w| !w.enabled && !w.is_fallback());
        if retired && self.remove_worker(entity_id)? {
            debug!(worker = %entity_id, "Removed disabled worker with empty chain");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FALLBACK_WORKER_ID, OrganizationalEntity, PLACEHOLDER_ID, placeholder};

    fn task(id: i64) -> Task {
        Task::new(TaskId(id), format!("task-{id}"), 5)
            .with_potential_owners([OrganizationalEntity::Group("staff".into())])
    }

    fn alice() -> Worker {
        Worker::new("alice").with_groups(["staff"])
    }

    fn solution() -> Solution {
        let mut s = Solution::new();
        s.ensure_placeholders().unwrap();
        s
    }

    fn chain_ids(s: &Solution, worker: &str) -> Vec<i64> {
        s.chain(worker).map(|t| t.id.0).collect()
    }

    #[test]
    fn assign_creates_worker_and_task() {
        let mut s = solution();
        s.apply_change(&ChangeOp::AssignTask {
            task: task(1),
            worker: alice(),
            pin: true,
        })
        .unwrap();

        assert!(s.worker("alice").is_some());
        let t = s.task(TaskId(1)).unwrap();
        assert_eq!(t.owner(), Some("alice"));
        assert!(t.pinned());
        s.check_invariants().unwrap();
    }

    #[test]
    fn pinned_assignment_goes_after_pinned_prefix() {
        let mut s = solution();
        let ops = vec![
            ChangeOp::AssignTask { task: task(1), worker: alice(), pin: true },
            ChangeOp::AssignTask { task: task(2), worker: alice(), pin: false },
            ChangeOp::AssignTask { task: task(3), worker: alice(), pin: false },
            ChangeOp::AssignTask { task: task(4), worker: alice(), pin: true },
        ];
        s.apply_changes(&ops).unwrap();
        assert_eq!(chain_ids(&s, "alice"), vec![1, 4, 2, 3]);
        s.check_invariants().unwrap();
    }

    #[test]
    fn release_clears_pin() {
        let mut s = solution();
        s.apply_changes(&[
            ChangeOp::AssignTask { task: task(7), worker: alice(), pin: true },
            ChangeOp::ReleaseTask(TaskId(7)),
        ])
        .unwrap();
        let t = s.task(TaskId(7)).unwrap();
        assert!(!t.is_assigned());
        assert!(!t.pinned());
    }

    #[test]
    fn operations_on_removed_tasks_are_skipped() {
        let mut s = solution();
        s.apply_changes(&[
            ChangeOp::AddTask(task(3)),
            ChangeOp::RemoveTask(TaskId(3)),
            ChangeOp::ReleaseTask(TaskId(3)),
            ChangeOp::RemoveTask(TaskId(3)),
        ])
        .unwrap();
        assert!(s.task(TaskId(3)).is_none());
    }

    #[test]
    fn placeholders_cannot_be_removed_or_moved() {
        let mut s = solution();
        assert!(matches!(
            s.apply_change(&ChangeOp::RemoveTask(PLACEHOLDER_ID)),
            Err(ModelError::ImmutablePlaceholder(_))
        ));
        let moved = ChangeOp::AssignTask {
            task: placeholder::placeholder(PLACEHOLDER_ID).unwrap(),
            worker: alice(),
            pin: false,
        };
        assert!(s.apply_change(&moved).is_err());
        assert!(s.has_placeholder_on_fallback());
    }

    #[test]
    fn disabling_worker_releases_unpinned_tasks() {
        let mut s = solution();
        s.apply_changes(&[
            ChangeOp::AssignTask { task: task(1), worker: alice(), pin: true },
            ChangeOp::AssignTask { task: task(2), worker: alice(), pin: false },
            ChangeOp::DisableWorker("alice".into()),
        ])
        .unwrap();

        assert_eq!(chain_ids(&s, "alice"), vec![1]);
        assert!(!s.task(TaskId(2)).unwrap().is_assigned());
        assert!(!s.worker("alice").unwrap().enabled);

        // The last pinned task leaving empties the chain and drops the worker.
        s.apply_change(&ChangeOp::RemoveTask(TaskId(1))).unwrap();
        assert!(s.worker("alice").is_none());
        s.check_invariants().unwrap();
    }

    #[test]
    fn update_worker_refreshes_groups_and_keeps_chain() {
        let mut s = solution();
        s.apply_change(&ChangeOp::AssignTask { task: task(1), worker: alice(), pin: false })
            .unwrap();
        s.apply_change(&ChangeOp::UpdateWorker(
            Worker::new("alice").with_groups(["staff", "HR"]),
        ))
        .unwrap();

        let worker = s.worker("alice").unwrap();
        assert!(worker.groups.contains("HR"));
        assert_eq!(chain_ids(&s, "alice"), vec![1]);
    }

    #[test]
    fn fallback_worker_is_never_disabled() {
        let mut s = solution();
        s.apply_change(&ChangeOp::DisableWorker(FALLBACK_WORKER_ID.into()))
            .unwrap();
        assert!(s.fallback_worker().unwrap().enabled);
        assert!(s.has_placeholder_on_fallback());
    }

    #[test]
    fn display_names_target() {
        let op = ChangeOp::AssignTask { task: task(9), worker: Worker::new("bob"), pin: true };
        assert_eq!(op.to_string(), "assign_task(9 -> bob, pin=true)");
        assert_eq!(ChangeOp::RemoveTask(TaskId(3)).to_string(), "remove_task(3)");
    }
}
