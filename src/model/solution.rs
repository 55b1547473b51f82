//! The assignment: workers, tasks and the chains linking them.
//!
//! Chains are stored as id links on the tasks (`previous`/`next`) plus a head
//! pointer on each worker. Every structural mutation goes through
//! [`Solution::relink`], which keeps both link directions consistent and
//! recomputes `owner`/`start_time`/`end_time` for the affected suffixes before
//! returning. A `Solution` is owned by exactly one execution context at a time;
//! other contexts receive clones.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use super::placeholder::{self, PLACEHOLDER_IDS};
use super::task::{Predecessor, Task, TaskId};
use super::worker::{FALLBACK_WORKER_ID, Worker};
use crate::error::ModelError;

/// Workers, tasks and their chains.
#[derive(Debug, Clone)]
pub struct Solution {
    id: Uuid,
    workers: Vec<Worker>,
    worker_index: HashMap<String, usize>,
    tasks: BTreeMap<TaskId, Task>,
}

impl Default for Solution {
    fn default() -> Self {
        Self::new()
    }
}

impl Solution {
    /// Empty solution containing only the fallback worker.
    pub fn new() -> Self {
        let mut solution = Self {
            id: Uuid::new_v4(),
            workers: Vec::new(),
            worker_index: HashMap::new(),
            tasks: BTreeMap::new(),
        };
        solution.add_worker(Worker::fallback());
        solution
    }

    /// Identity of this solution lineage. Every recovery starts a new one.
    pub fn id(&self) -> Uuid {
        self.id
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }

    pub fn worker(&self, entity_id: &str) -> Option<&Worker> {
        self.worker_index.get(entity_id).map(|&i| &self.workers[i])
    }

    pub fn fallback_worker(&self) -> Option<&Worker> {
        self.worker(FALLBACK_WORKER_ID)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Tasks that exist in the task tracker, i.e. everything but placeholders.
    pub fn real_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(|t| !t.is_placeholder())
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn contains_task(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn real_task_count(&self) -> usize {
        self.real_tasks().count()
    }

    /// Tasks of a worker's chain, head first.
    pub fn chain<'a>(&'a self, entity_id: &str) -> ChainIter<'a> {
        ChainIter {
            solution: self,
            next: self.worker(entity_id).and_then(|w| w.first_task),
        }
    }

    /// Last element of a worker's chain: its tail task, or the worker itself.
    pub fn tail(&self, entity_id: &str) -> Predecessor {
        self.chain(entity_id)
            .last()
            .map(|t| Predecessor::Task(t.id))
            .unwrap_or_else(|| Predecessor::Worker(entity_id.to_string()))
    }

    /// Last pinned task of a worker's chain, or the worker when none is pinned.
    pub fn last_pinned(&self, entity_id: &str) -> Predecessor {
        self.chain(entity_id)
            .take_while(|t| t.pinned)
            .last()
            .map(|t| Predecessor::Task(t.id))
            .unwrap_or_else(|| Predecessor::Worker(entity_id.to_string()))
    }

    /// End time of a worker's chain (0 for an empty chain).
    pub fn chain_end(&self, entity_id: &str) -> i64 {
        self.chain(entity_id)
            .last()
            .and_then(|t| t.end_time)
            .unwrap_or(0)
    }

    /// Whether the task's current owner may hold it.
    pub fn accepts_owner(&self, id: TaskId) -> bool {
        let Some(task) = self.tasks.get(&id) else {
            return false;
        };
        match task.owner.as_deref().and_then(|owner| self.worker(owner)) {
            Some(worker) => task.accepts(worker),
            None => false,
        }
    }

    /// Every task is linked into some chain.
    pub fn is_initialized(&self) -> bool {
        self.tasks.values().all(Task::is_assigned)
    }

    pub fn has_placeholder_on_fallback(&self) -> bool {
        PLACEHOLDER_IDS.iter().any(|id| {
            self.tasks
                .get(id)
                .is_some_and(|t| t.owner.as_deref() == Some(FALLBACK_WORKER_ID))
        })
    }

    // ── Structural mutation ─────────────────────────────────────────

    /// Add a worker, or refresh groups/enabled of an existing one while
    /// keeping its chain.
    pub fn add_worker(&mut self, worker: Worker) {
        match self.worker_index.get(&worker.entity_id) {
            Some(&i) => {
                let existing = &mut self.workers[i];
                existing.groups = worker.groups;
                existing.enabled = worker.enabled || existing.is_fallback();
            }
            None => {
                let worker = worker.detached();
                self.worker_index
                    .insert(worker.entity_id.clone(), self.workers.len());
                self.workers.push(worker);
            }
        }
    }

    /// Remove a worker with an empty chain. The fallback worker is never removed.
    pub fn remove_worker(&mut self, entity_id: &str) -> Result<bool, ModelError> {
        let Some(&i) = self.worker_index.get(entity_id) else {
            return Ok(false);
        };
        if self.workers[i].is_fallback() || self.workers[i].first_task.is_some() {
            return Ok(false);
        }
        self.workers.remove(i);
        self.worker_index = self
            .workers
            .iter()
            .enumerate()
            .map(|(i, w)| (w.entity_id.clone(), i))
            .collect();
        Ok(true)
    }

    pub(crate) fn worker_mut(&mut self, entity_id: &str) -> Option<&mut Worker> {
        let i = *self.worker_index.get(entity_id)?;
        self.workers.get_mut(i)
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Insert an unassigned task. Returns false if the id is already present.
    pub fn add_task(&mut self, task: Task) -> bool {
        if self.tasks.contains_key(&task.id) {
            return false;
        }
        self.tasks.insert(task.id, task.detached());
        true
    }

    /// Unlink and drop a task.
    pub fn remove_task(&mut self, id: TaskId) -> Option<Task> {
        self.detach(id);
        self.tasks.remove(&id)
    }

    /// Move `id` so that it directly follows `new_previous`, or unassign it
    /// when `new_previous` is `None`.
    ///
    /// The task is first taken out of its current chain (its old successor is
    /// relinked to its old predecessor), then inserted after `new_previous`
    /// (taking over that element's successor). Derived attributes are
    /// recomputed for both affected suffixes before this returns.
    pub fn relink(
        &mut self,
        id: TaskId,
        new_previous: Option<Predecessor>,
    ) -> Result<(), ModelError> {
        if !self.tasks.contains_key(&id) {
            return Err(ModelError::UnknownTask(id));
        }
        match &new_previous {
            Some(Predecessor::Task(p)) if *p == id => return Err(ModelError::SelfLink(id)),
            Some(Predecessor::Task(p)) => {
                let predecessor = self.tasks.get(p).ok_or(ModelError::UnknownTask(*p))?;
                if !predecessor.is_assigned() {
                    return Err(ModelError::UnassignedPredecessor {
                        task: id,
                        predecessor: *p,
                    });
                }
            }
            Some(Predecessor::Worker(w)) => {
                if !self.worker_index.contains_key(w) {
                    return Err(ModelError::UnknownWorker(w.clone()));
                }
            }
            None => {}
        }

        self.detach(id);
        if let Some(previous) = new_previous {
            self.attach(id, previous);
            self.propagate(id);
        }
        Ok(())
    }

    /// Append a task at the end of a worker's chain.
    pub fn append(&mut self, id: TaskId, entity_id: &str) -> Result<(), ModelError> {
        if !self.worker_index.contains_key(entity_id) {
            return Err(ModelError::UnknownWorker(entity_id.to_string()));
        }
        // Detach first so the tail is never the task itself.
        self.relink(id, None)?;
        let tail = self.tail(entity_id);
        self.relink(id, Some(tail))
    }

    /// Insert a task right after the last pinned task of a worker's chain.
    pub fn insert_after_pinned(&mut self, id: TaskId, entity_id: &str) -> Result<(), ModelError> {
        if !self.worker_index.contains_key(entity_id) {
            return Err(ModelError::UnknownWorker(entity_id.to_string()));
        }
        self.relink(id, None)?;
        let anchor = self.last_pinned(entity_id);
        self.relink(id, Some(anchor))
    }

    /// Make sure both placeholders exist and sit on the fallback chain.
    pub fn ensure_placeholders(&mut self) -> Result<(), ModelError> {
        for id in PLACEHOLDER_IDS {
            if let Some(task) = placeholder::placeholder(id) {
                self.add_task(task);
            }
            let on_fallback = self
                .tasks
                .get(&id)
                .is_some_and(|t| t.owner.as_deref() == Some(FALLBACK_WORKER_ID));
            if !on_fallback {
                self.append(id, FALLBACK_WORKER_ID)?;
            }
        }
        Ok(())
    }

    fn next_of(&self, predecessor: &Predecessor) -> Option<TaskId> {
        match predecessor {
            Predecessor::Worker(w) => self.worker(w).and_then(|w| w.first_task),
            Predecessor::Task(t) => self.tasks.get(t).and_then(|t| t.next),
        }
    }

    fn set_next(&mut self, predecessor: &Predecessor, next: Option<TaskId>) {
        match predecessor {
            Predecessor::Worker(w) => {
                if let Some(worker) = self.worker_mut(w) {
                    worker.first_task = next;
                }
            }
            Predecessor::Task(t) => {
                if let Some(task) = self.tasks.get_mut(t) {
                    task.next = next;
                }
            }
        }
    }

    fn detach(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        let previous = task.previous.take();
        let next = task.next.take();
        task.owner = None;
        task.start_time = None;
        task.end_time = None;

        let Some(previous) = previous else {
            return;
        };
        self.set_next(&previous, next);
        if let Some(next_id) = next {
            if let Some(next_task) = self.tasks.get_mut(&next_id) {
                next_task.previous = Some(previous);
            }
            self.propagate(next_id);
        }
    }

    fn attach(&mut self, id: TaskId, previous: Predecessor) {
        let successor = self.next_of(&previous);
        self.set_next(&previous, Some(id));
        if let Some(task) = self.tasks.get_mut(&id) {
            task.previous = Some(previous);
            task.next = successor;
        }
        if let Some(task) = successor.and_then(|s| self.tasks.get_mut(&s)) {
            task.previous = Some(Predecessor::Task(id));
        }
    }

    /// Recompute owner/start/end from `from` to the end of its chain.
    fn propagate(&mut self, from: TaskId) {
        let mut current = Some(from);
        while let Some(id) = current {
            let (owner, start) = match self.tasks.get(&id).and_then(|t| t.previous.as_ref()) {
                Some(Predecessor::Worker(w)) => (Some(w.clone()), 0),
                Some(Predecessor::Task(p)) => match self.tasks.get(p) {
                    Some(p) => (p.owner.clone(), p.end_time.unwrap_or(0)),
                    None => (None, 0),
                },
                None => break,
            };
            let Some(task) = self.tasks.get_mut(&id) else {
                break;
            };
            task.owner = owner;
            task.start_time = Some(start);
            task.end_time = Some(start + task.duration);
            current = task.next;
        }
    }

    // ── Invariants ──────────────────────────────────────────────────

    /// Verify link symmetry, single ownership, timing and placeholder presence.
    pub fn check_invariants(&self) -> Result<(), ModelError> {
        let mut seen = 0usize;
        for worker in &self.workers {
            let mut previous = Predecessor::Worker(worker.entity_id.clone());
            let mut end = 0;
            let mut cursor = worker.first_task;
            while let Some(id) = cursor {
                let task = self.tasks.get(&id).ok_or(ModelError::UnknownTask(id))?;
                if task.previous.as_ref() != Some(&previous) {
                    return Err(ModelError::Invariant(format!(
                        "task {id} previous link does not match its position"
                    )));
                }
                if task.owner.as_deref() != Some(worker.entity_id.as_str()) {
                    return Err(ModelError::Invariant(format!(
                        "task {id} owner is {:?}, expected {}",
                        task.owner, worker.entity_id
                    )));
                }
                if task.start_time != Some(end) || task.end_time != Some(end + task.duration) {
                    return Err(ModelError::Invariant(format!(
                        "task {id} timing {:?}..{:?} does not follow predecessor end {end}",
                        task.start_time, task.end_time
                    )));
                }
                seen += 1;
                if seen > self.tasks.len() {
                    return Err(ModelError::Invariant(format!(
                        "cycle detected in chain of {}",
                        worker.entity_id
                    )));
                }
                end = task.end_time.unwrap_or(end);
                previous = Predecessor::Task(id);
                cursor = task.next;
            }
        }

        let assigned = self.tasks.values().filter(|t| t.is_assigned()).count();
        if assigned != seen {
            return Err(ModelError::Invariant(format!(
                "{assigned} tasks are linked but only {seen} are reachable from a worker"
            )));
        }
        if let Some(task) = self
            .tasks
            .values()
            .find(|t| !t.is_assigned() && (t.next.is_some() || t.owner.is_some()))
        {
            return Err(ModelError::Invariant(format!(
                "unassigned task {} still carries chain data",
                task.id
            )));
        }
        if !PLACEHOLDER_IDS.iter().any(|id| self.tasks.contains_key(id)) {
            return Err(ModelError::Invariant(
                "no placeholder task in the working set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Iterator over one worker's chain.
pub struct ChainIter<'a> {
    solution: &'a Solution,
    next: Option<TaskId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.solution.tasks.get(&self.next?)?;
        self.next = task.next;
        Some(task)
    }
}
