//! Change builder: diff the current solution against a fresh snapshot.
//!
//! Output order within one batch:
//! 1. roster additions and updates
//! 2. the snapshot pass, in snapshot order
//! 3. removals of known tasks missing from the snapshot
//! 4. disables of workers gone from the roster
//! 5. placeholder restore, when needed
//!
//! Removals come after the snapshot pass so they never disturb positions that
//! same-pass assignments refer to.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use super::types::SyncResult;
use crate::model::{
    ChangeOp, FALLBACK_WORKER_ID, PLACEHOLDER_IDS, Solution, Task, TaskId, Worker,
    is_fallback_worker, placeholder,
};
use crate::tracker::{TaskSnapshot, TaskStatus};

/// Build a task (unlinked) from its snapshot.
pub fn task_from_snapshot(snapshot: &TaskSnapshot) -> Task {
    Task::new(snapshot.task_id, snapshot.name.clone(), snapshot.priority)
        .with_process(
            snapshot.container_id.clone(),
            snapshot.process_id.clone(),
            snapshot.process_instance_id,
        )
        .with_potential_owners(snapshot.potential_owners.iter().cloned())
}

/// Computes ordered change batches.
pub struct ChangeBuilder<'a> {
    solution: &'a Solution,
    sync: &'a SyncResult,
    /// Workers created during this pass, so repeated owners resolve the same.
    created: HashMap<String, Worker>,
    changes: Vec<ChangeOp>,
}

impl<'a> ChangeBuilder<'a> {
    pub fn new(solution: &'a Solution, sync: &'a SyncResult) -> Self {
        Self {
            solution,
            sync,
            created: HashMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn build(mut self) -> Vec<ChangeOp> {
        let (solution, sync) = (self.solution, self.sync);
        self.roster_pass();

        let mut seen: HashSet<TaskId> = HashSet::new();
        for snapshot in &sync.snapshot {
            if snapshot.task_id.is_reserved() {
                continue;
            }
            if self.snapshot_change(snapshot) {
                seen.insert(snapshot.task_id);
            }
        }

        let removals: Vec<ChangeOp> = solution
            .real_tasks()
            .filter(|t| !seen.contains(&t.id))
            .map(|t| ChangeOp::RemoveTask(t.id))
            .collect();
        self.changes.extend(removals);

        self.disable_pass();
        self.placeholder_pass();

        debug!(changes = self.changes.len(), "Change batch built");
        for change in &self.changes {
            trace!(change = %change, "Change");
        }
        self.changes
    }

    /// Emit the change for one snapshot item. Returns whether the item counts
    /// as present in the working set.
    fn snapshot_change(&mut self, snapshot: &TaskSnapshot) -> bool {
        let solution = self.solution;
        let local = solution.task(snapshot.task_id);
        match snapshot.status {
            TaskStatus::Ready => {
                match local {
                    None => self.changes.push(ChangeOp::AddTask(task_from_snapshot(snapshot))),
                    Some(task) => {
                        if let Some(owner) = task.owner() {
                            // A task on the fallback chain is never published to
                            // anyone, so there is no plan to confirm.
                            let confirmed = is_fallback_worker(owner)
                                || snapshot
                                    .planning
                                    .as_ref()
                                    .is_some_and(|p| p.assigned_user == owner);
                            if task.pinned() || !confirmed {
                                self.changes.push(ChangeOp::ReleaseTask(task.id));
                            }
                        }
                    }
                }
                true
            }
            TaskStatus::Reserved | TaskStatus::InProgress | TaskStatus::Suspended => {
                let Some(owner) = snapshot.owner() else {
                    // Suspended without owner: left alone until it reopens.
                    return true;
                };
                let stale = match local {
                    None => true,
                    Some(task) => task.owner() != Some(owner) || !task.pinned(),
                };
                if stale {
                    let worker = self.resolve_worker(owner);
                    self.changes.push(ChangeOp::AssignTask {
                        task: task_from_snapshot(snapshot),
                        worker,
                        pin: true,
                    });
                }
                true
            }
            _ => false,
        }
    }

    /// Known worker, then one created earlier in this pass, then the
    /// directory, then a bare worker named after the owner.
    fn resolve_worker(&mut self, entity_id: &str) -> Worker {
        if let Some(worker) = self.solution.worker(entity_id) {
            return worker.detached();
        }
        if let Some(worker) = self.created.get(entity_id) {
            return worker.clone();
        }
        let worker = match self.sync.identities.get(entity_id) {
            Some(identity) => Worker::from_identity(identity),
            None => {
                debug!(worker = %entity_id, "Owner unknown to the directory, creating worker");
                Worker::new(entity_id)
            }
        };
        self.created.insert(entity_id.to_string(), worker.clone());
        worker
    }

    fn roster_pass(&mut self) {
        let (solution, sync) = (self.solution, self.sync);
        let Some(roster) = &sync.roster else {
            return;
        };
        for identity in roster {
            if is_fallback_worker(&identity.id) {
                continue;
            }
            let fresh = Worker::from_identity(identity);
            match solution.worker(&identity.id) {
                None => {
                    self.created.insert(identity.id.clone(), fresh.clone());
                    self.changes.push(ChangeOp::AddWorker(fresh));
                }
                Some(existing) if existing.groups != fresh.groups || !existing.enabled => {
                    self.changes.push(ChangeOp::UpdateWorker(fresh));
                }
                Some(_) => {}
            }
        }
    }

    fn disable_pass(&mut self) {
        let (solution, sync) = (self.solution, self.sync);
        let Some(roster) = &sync.roster else {
            return;
        };
        let listed: HashSet<&str> = roster.iter().map(|i| i.id.as_str()).collect();
        // Owners of active work stay, even when the directory forgot them.
        let owning: HashSet<&str> = sync
            .snapshot
            .iter()
            .filter_map(TaskSnapshot::owner)
            .collect();
        let disables: Vec<ChangeOp> = solution
            .workers()
            .filter(|w| !w.is_fallback() && w.enabled)
            .filter(|w| !listed.contains(w.entity_id.as_str()))
            .filter(|w| !owning.contains(w.entity_id.as_str()))
            .map(|w| ChangeOp::DisableWorker(w.entity_id.clone()))
            .collect();
        self.changes.extend(disables);
    }

    fn placeholder_pass(&mut self) {
        if self.solution.has_placeholder_on_fallback() {
            return;
        }
        for id in PLACEHOLDER_IDS {
            if let Some(task) = placeholder::placeholder(id) {
                self.changes.push(ChangeOp::AssignTask {
                    task,
                    worker: Worker::fallback(),
                    pin: false,
                });
            }
        }
        debug!(worker = %FALLBACK_WORKER_ID, "Placeholder restore scheduled");
    }
}

/// Convenience wrapper around [`ChangeBuilder`].
pub fn build_changes(solution: &Solution, sync: &SyncResult) -> Vec<ChangeOp> {
    ChangeBuilder::new(solution, sync).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Identity;
    use crate::model::OrganizationalEntity;
    use crate::tracker::PlanningRecord;
    use chrono::Utc;

    fn staff() -> Vec<OrganizationalEntity> {
        vec![OrganizationalEntity::Group("staff".into())]
    }

    fn snapshot(id: i64, status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot::new(TaskId(id), status).with_potential_owners(staff())
    }

    fn task(id: i64) -> Task {
        task_from_snapshot(&snapshot(id, TaskStatus::Ready))
    }

    fn worker(id: &str) -> Worker {
        Worker::new(id).with_groups(["staff"])
    }

    fn planned(user: &str, visible: bool) -> PlanningRecord {
        PlanningRecord { assigned_user: user.into(), index: 0, visible }
    }

    /// alice: 7 (pinned), 9 (pinned), 3; bob: 4; unassigned: 8.
    fn solution() -> Solution {
        let mut s = Solution::new();
        s.ensure_placeholders().unwrap();
        s.apply_changes(&[
            ChangeOp::AddWorker(worker("alice")),
            ChangeOp::AddWorker(worker("bob")),
            ChangeOp::AssignTask { task: task(7), worker: worker("alice"), pin: true },
            ChangeOp::AssignTask { task: task(9), worker: worker("alice"), pin: true },
            ChangeOp::AssignTask { task: task(3), worker: worker("alice"), pin: false },
            ChangeOp::AssignTask { task: task(4), worker: worker("bob"), pin: false },
            ChangeOp::AddTask(task(8)),
        ])
        .unwrap();
        s
    }

    /// Snapshot that agrees with `solution()` exactly.
    fn matching_snapshot() -> Vec<TaskSnapshot> {
        vec![
            snapshot(3, TaskStatus::Ready).with_planning(planned("alice", false)),
            snapshot(4, TaskStatus::Ready).with_planning(planned("bob", false)),
            snapshot(7, TaskStatus::Reserved).with_owner("alice"),
            snapshot(8, TaskStatus::Ready),
            snapshot(9, TaskStatus::InProgress).with_owner("alice"),
        ]
    }

    fn sync(snapshot: Vec<TaskSnapshot>) -> SyncResult {
        SyncResult::new(Utc::now(), snapshot)
    }

    fn replace(mut items: Vec<TaskSnapshot>, item: TaskSnapshot) -> Vec<TaskSnapshot> {
        items.retain(|s| s.task_id != item.task_id);
        items.push(item);
        items
    }

    #[test]
    fn matching_snapshot_yields_no_changes() {
        let changes = build_changes(&solution(), &sync(matching_snapshot()));
        assert!(changes.is_empty(), "unexpected changes: {changes:?}");
    }

    #[test]
    fn new_open_item_is_added() {
        let mut items = matching_snapshot();
        items.push(snapshot(5, TaskStatus::Ready));
        let changes = build_changes(&solution(), &sync(items));
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], ChangeOp::AddTask(t) if t.id == TaskId(5)));
    }

    #[test]
    fn externally_released_item_is_released() {
        let items = replace(matching_snapshot(), snapshot(7, TaskStatus::Ready));
        let changes = build_changes(&solution(), &sync(items));
        assert_eq!(changes, vec![ChangeOp::ReleaseTask(TaskId(7))]);

        let mut s = solution();
        s.apply_changes(&changes).unwrap();
        let released = s.task(TaskId(7)).unwrap();
        assert!(!released.pinned());
        assert!(!released.is_assigned());
    }

    #[test]
    fn unpublished_local_assignment_is_released() {
        // Task 3 is Ready with no plan for alice: someone unassigned it.
        let items = replace(matching_snapshot(), snapshot(3, TaskStatus::Ready));
        let changes = build_changes(&solution(), &sync(items));
        assert_eq!(changes, vec![ChangeOp::ReleaseTask(TaskId(3))]);
    }

    #[test]
    fn externally_reassigned_item_is_pinned_to_new_owner() {
        let items = replace(
            matching_snapshot(),
            snapshot(9, TaskStatus::Reserved).with_owner("bob"),
        );
        let changes = build_changes(&solution(), &sync(items));
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            ChangeOp::AssignTask { task, worker, pin } => {
                assert_eq!(task.id, TaskId(9));
                assert_eq!(worker.entity_id, "bob");
                assert!(*pin);
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn visible_but_unpinned_item_gets_pinned() {
        let items = replace(
            matching_snapshot(),
            snapshot(3, TaskStatus::Reserved)
                .with_owner("alice")
                .with_planning(planned("alice", true)),
        );
        let changes = build_changes(&solution(), &sync(items));
        assert!(matches!(
            &changes[..],
            [ChangeOp::AssignTask { task, pin: true, .. }] if task.id == TaskId(3)
        ));
    }

    #[test]
    fn disappeared_item_removed_after_other_changes() {
        let mut items: Vec<TaskSnapshot> = matching_snapshot()
            .into_iter()
            .filter(|s| s.task_id != TaskId(3))
            .collect();
        items.push(snapshot(5, TaskStatus::Ready));
        items = replace(items, snapshot(9, TaskStatus::Reserved).with_owner("bob"));

        let changes = build_changes(&solution(), &sync(items));
        assert_eq!(changes.len(), 3);
        assert_eq!(changes.last(), Some(&ChangeOp::RemoveTask(TaskId(3))));
    }

    #[test]
    fn completed_items_count_as_absent() {
        let items = replace(
            matching_snapshot(),
            snapshot(4, TaskStatus::Completed).with_owner("bob"),
        );
        let changes = build_changes(&solution(), &sync(items));
        assert_eq!(changes, vec![ChangeOp::RemoveTask(TaskId(4))]);
    }

    #[test]
    fn suspended_without_owner_is_left_alone() {
        let items = replace(matching_snapshot(), snapshot(8, TaskStatus::Suspended));
        assert!(build_changes(&solution(), &sync(items)).is_empty());

        let mut items = matching_snapshot();
        items.push(snapshot(6, TaskStatus::Suspended));
        assert!(build_changes(&solution(), &sync(items)).is_empty());
    }

    #[test]
    fn unknown_owner_resolved_from_identities_or_by_convention() {
        let mut items = matching_snapshot();
        items.push(snapshot(10, TaskStatus::Reserved).with_owner("carol"));
        items.push(snapshot(11, TaskStatus::Reserved).with_owner("carol"));
        items.push(snapshot(12, TaskStatus::InProgress).with_owner("dave"));

        let mut result = sync(items);
        result.identities.insert(
            "carol".into(),
            Identity::new("carol").with_groups(["staff", "HR"]),
        );
        let changes = build_changes(&solution(), &result);

        let workers: Vec<(&str, usize)> = changes
            .iter()
            .filter_map(|c| match c {
                ChangeOp::AssignTask { worker, .. } => {
                    Some((worker.entity_id.as_str(), worker.groups.len()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(workers, vec![("carol", 2), ("carol", 2), ("dave", 0)]);
    }

    #[test]
    fn roster_changes_add_update_and_disable() {
        let roster = vec![
            Identity::new("alice").with_groups(["staff", "HR"]),
            Identity::new("erin").with_groups(["staff"]),
        ];
        let changes = build_changes(
            &solution(),
            &sync(matching_snapshot()).with_roster(roster),
        );
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], ChangeOp::UpdateWorker(w) if w.entity_id == "alice"));
        assert!(matches!(&changes[1], ChangeOp::AddWorker(w) if w.entity_id == "erin"));
        assert_eq!(changes[2], ChangeOp::DisableWorker("bob".into()));
    }

    #[test]
    fn roster_never_disables_active_owners_or_fallback() {
        let roster = vec![Identity::new("bob").with_groups(["staff"])];
        let changes = build_changes(
            &solution(),
            &sync(matching_snapshot()).with_roster(roster),
        );
        // alice still owns reserved work, the fallback worker is never listed.
        assert!(changes.is_empty(), "unexpected changes: {changes:?}");
    }

    #[test]
    fn missing_placeholders_are_restored_last() {
        let mut s = Solution::new();
        s.apply_change(&ChangeOp::AddWorker(worker("alice"))).unwrap();
        let changes = build_changes(&s, &sync(vec![snapshot(1, TaskStatus::Ready)]));

        assert!(matches!(&changes[0], ChangeOp::AddTask(t) if t.id == TaskId(1)));
        let restored: Vec<TaskId> = changes[1..]
            .iter()
            .filter_map(|c| match c {
                ChangeOp::AssignTask { task, worker, pin: false } if worker.is_fallback() => {
                    Some(task.id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(restored, PLACEHOLDER_IDS.to_vec());

        s.apply_changes(&changes).unwrap();
        assert!(s.has_placeholder_on_fallback());
    }

    #[test]
    fn applying_the_diff_converges() {
        let mut s = solution();
        let items = vec![
            snapshot(3, TaskStatus::Reserved).with_owner("bob"),
            snapshot(5, TaskStatus::Ready),
            snapshot(7, TaskStatus::Ready),
            snapshot(9, TaskStatus::InProgress).with_owner("alice"),
        ];
        let changes = build_changes(&s, &sync(items.clone()));
        s.apply_changes(&changes).unwrap();
        s.check_invariants().unwrap();

        // Everything the snapshot pins now matches; open tasks are unassigned.
        assert!(build_changes(&s, &sync(items)).is_empty());
        assert!(s.task(TaskId(4)).is_none());
        assert!(s.task(TaskId(8)).is_none());
    }
}
