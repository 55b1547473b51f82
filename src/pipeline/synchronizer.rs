//! Solution synchronizer: polls the task tracker on a fixed interval.
//!
//! While the executor is stopped, each tick tries to recover: a full read of
//! the active tasks and the roster is turned into an initial solution and the
//! executor is started with it. While the executor runs, each tick reads what
//! changed since the previous read (minus a lookback shift), merges it into a
//! local cache and hands the merged view to the listener. The roster, together
//! with a full re-read, is refreshed on its own, slower period.
//!
//! A failing tick is logged and retried on the next one; it never ends the loop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::builder::build_initial_solution;
use super::types::SyncResult;
use crate::directory::{Identity, UserDirectory};
use crate::error::{Error, SolverError};
use crate::model::TaskId;
use crate::solver::{SolverExecutor, SolverStatus};
use crate::store::AssignmentStore;
use crate::tracker::{TaskSnapshot, TaskStatus, TaskTracker};

/// Callback invoked on the synchronizer's context for every incremental read.
pub type SyncListener = Arc<dyn Fn(SyncResult) + Send + Sync>;

/// Timing of the synchronizer loop.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sync_interval: Duration,
    pub queries_shift: Duration,
    pub users_sync_interval: Duration,
}

/// State owned by the loop.
#[derive(Default)]
struct SyncState {
    cache: BTreeMap<TaskId, TaskSnapshot>,
    last_read: Option<DateTime<Utc>>,
    roster: HashSet<String>,
    /// Directory answers for owners outside the roster, `None` when unknown.
    resolved: HashMap<String, Option<Identity>>,
    last_users_sync: Option<Instant>,
}

impl SyncState {
    fn reset(&mut self, read_start: DateTime<Utc>, tasks: Vec<TaskSnapshot>, roster: &[Identity]) {
        self.cache = tasks.into_iter().map(|t| (t.task_id, t)).collect();
        self.last_read = Some(read_start);
        self.roster = roster.iter().map(|i| i.id.clone()).collect();
        self.resolved.clear();
        self.last_users_sync = Some(Instant::now());
    }
}

pub struct SolutionSynchronizer {
    executor: Arc<SolverExecutor>,
    tracker: Arc<dyn TaskTracker>,
    directory: Arc<dyn UserDirectory>,
    store: Option<Arc<dyn AssignmentStore>>,
    settings: SyncSettings,
    start_signal: Notify,
    shutdown: Notify,
    destroyed: AtomicBool,
    spawned: AtomicBool,
}

impl SolutionSynchronizer {
    pub fn new(
        executor: Arc<SolverExecutor>,
        tracker: Arc<dyn TaskTracker>,
        directory: Arc<dyn UserDirectory>,
        store: Option<Arc<dyn AssignmentStore>>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            executor,
            tracker,
            directory,
            store,
            settings,
            start_signal: Notify::new(),
            shutdown: Notify::new(),
            destroyed: AtomicBool::new(false),
            spawned: AtomicBool::new(false),
        }
    }

    /// Spawn the polling context. It idles until [`start`](Self::start).
    pub fn spawn(self: &Arc<Self>, listener: SyncListener) -> Result<JoinHandle<()>, SolverError> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return Err(SolverError::AlreadyRunning);
        }
        let synchronizer = Arc::clone(self);
        Ok(tokio::spawn(async move { synchronizer.run(listener).await }))
    }

    pub fn start(&self) {
        self.start_signal.notify_one();
    }

    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
            info!("Solution synchronizer destroyed");
        }
    }

    async fn run(self: Arc<Self>, listener: SyncListener) {
        tokio::select! {
            _ = self.shutdown.notified() => return,
            _ = self.start_signal.notified() => {}
        }
        info!(
            interval_ms = self.settings.sync_interval.as_millis() as u64,
            "Solution synchronizer started"
        );

        let mut tick = tokio::time::interval(self.settings.sync_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = SyncState::default();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = tick.tick() => {}
            }
            if self.destroyed.load(Ordering::SeqCst) {
                break;
            }

            match self.executor.status() {
                SolverStatus::Stopped => {
                    if let Err(e) = self.recover(&mut state).await {
                        warn!(error = %e, "Recovery failed, retrying next tick");
                    }
                }
                SolverStatus::Started => match self.refresh(&mut state).await {
                    Ok(result) => listener(result),
                    Err(e) => warn!(error = %e, "Synchronization failed, retrying next tick"),
                },
                SolverStatus::Destroyed => break,
                status => debug!(status = %status, "Executor busy, tick skipped"),
            }
        }
        info!("Solution synchronizer shutting down");
    }

    async fn recover(&self, state: &mut SyncState) -> Result<(), Error> {
        let read_start = Utc::now();
        let tasks = self.tracker.fetch_tasks(&TaskStatus::ACTIVE, None).await?;
        if tasks.is_empty() {
            debug!("No active tasks yet, recovery postponed");
            return Ok(());
        }
        let roster = self.directory.list_all_users().await?;

        let mut snapshot = tasks.clone();
        self.fill_planning(&mut snapshot).await;
        let solution = build_initial_solution(&snapshot, &roster)?;

        state.reset(read_start, tasks, &roster);
        self.executor.start(solution)?;
        info!(tasks = state.cache.len(), users = roster.len(), "Recovered solution submitted");
        Ok(())
    }

    async fn refresh(&self, state: &mut SyncState) -> Result<SyncResult, Error> {
        let read_start = Utc::now();
        let roster_due = state
            .last_users_sync
            .is_none_or(|at| at.elapsed() >= self.settings.users_sync_interval);

        let roster = if roster_due {
            let tasks = self.tracker.fetch_tasks(&TaskStatus::ACTIVE, None).await?;
            let roster = self.directory.list_all_users().await?;
            let gone: Vec<TaskId> = state
                .cache
                .keys()
                .filter(|id| !tasks.iter().any(|t| t.task_id == **id))
                .copied()
                .collect();
            self.forget(&gone).await;
            state.reset(read_start, tasks, &roster);
            info!(users = roster.len(), tasks = state.cache.len(), "Roster refreshed");
            Some(roster)
        } else {
            let shift = chrono::Duration::from_std(self.settings.queries_shift)
                .unwrap_or(chrono::Duration::zero());
            let since = state.last_read.map(|t| t - shift);
            let changed = self.tracker.fetch_tasks(&TaskStatus::ALL, since).await?;
            debug!(changed = changed.len(), since = ?since, "Incremental read");

            let mut gone = Vec::new();
            for task in changed {
                if task.status.is_active() {
                    state.cache.insert(task.task_id, task);
                } else if state.cache.remove(&task.task_id).is_some() {
                    gone.push(task.task_id);
                }
            }
            self.forget(&gone).await;
            state.last_read = Some(read_start);
            None
        };

        let mut snapshot: Vec<TaskSnapshot> = state.cache.values().cloned().collect();
        self.fill_planning(&mut snapshot).await;
        let identities = self.resolve_owners(state, &snapshot).await;

        Ok(SyncResult {
            read_start,
            snapshot,
            identities,
            roster,
        })
    }

    /// Look up owners outside the roster. Done here, outside any lock.
    async fn resolve_owners(
        &self,
        state: &mut SyncState,
        snapshot: &[TaskSnapshot],
    ) -> HashMap<String, Identity> {
        let unknown: HashSet<&str> = snapshot
            .iter()
            .filter_map(TaskSnapshot::owner)
            .filter(|o| !state.roster.contains(*o))
            .collect();

        let mut identities = HashMap::new();
        for owner in unknown {
            if !state.resolved.contains_key(owner) {
                match self.directory.find_user(owner).await {
                    Ok(found) => {
                        state.resolved.insert(owner.to_string(), found);
                    }
                    Err(e) => {
                        warn!(user = %owner, error = %e, "Owner lookup failed");
                        continue;
                    }
                }
            }
            if let Some(Some(identity)) = state.resolved.get(owner) {
                identities.insert(owner.to_string(), identity.clone());
            }
        }
        identities
    }

    /// Fill missing planning data from the store.
    async fn fill_planning(&self, snapshot: &mut [TaskSnapshot]) {
        let Some(store) = &self.store else {
            return;
        };
        for item in snapshot.iter_mut().filter(|s| s.planning.is_none()) {
            match store.read_last_known(item.task_id).await {
                Ok(Some(record)) => item.planning = Some(record.planning()),
                Ok(None) => {}
                Err(e) => warn!(task_id = %item.task_id, error = %e, "Failed to read last known assignment"),
            }
        }
    }

    async fn forget(&self, gone: &[TaskId]) {
        let Some(store) = &self.store else {
            return;
        };
        for id in gone {
            if let Err(e) = store.delete(*id).await {
                warn!(task_id = %id, error = %e, "Failed to forget assignment");
            }
        }
    }
}
