//! Optimizer executor.
//!
//! Owns the engine's execution context. A single background task waits for a
//! start request, runs the search on its own copy of the solution, applies
//! change batches as they arrive and reports best solutions through a
//! listener. The solution being searched is never shared: listeners receive
//! immutable snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

use super::engine::{Score, SolverEngine};
use super::state::SolverStatus;
use crate::error::{ModelError, SolverError};
use crate::model::{ChangeOp, Solution};

/// A best solution found by the engine.
#[derive(Debug, Clone)]
pub struct BestSolutionEvent {
    pub solution: Arc<Solution>,
    pub score: Score,
    /// No submitted change batch was waiting when this solution was taken.
    pub every_change_processed: bool,
}

/// Callback invoked on the engine's context for every best solution.
pub type BestSolutionListener = Arc<dyn Fn(BestSolutionEvent) + Send + Sync>;

struct Session {
    changes_tx: mpsc::UnboundedSender<Vec<ChangeOp>>,
    terminate: Arc<Notify>,
}

struct Inner {
    status: SolverStatus,
    /// Single-slot handoff for the next start request.
    pending_start: Option<Solution>,
    session: Option<Session>,
}

/// Lifecycle wrapper around a [`SolverEngine`].
pub struct SolverExecutor {
    engine: Arc<dyn SolverEngine>,
    improve_interval: Duration,
    inner: Mutex<Inner>,
    start_signal: Notify,
    spawned: AtomicBool,
}

impl SolverExecutor {
    pub fn new(engine: Arc<dyn SolverEngine>, improve_interval: Duration) -> Self {
        Self {
            engine,
            improve_interval,
            inner: Mutex::new(Inner {
                status: SolverStatus::Stopped,
                pending_start: None,
                session: None,
            }),
            start_signal: Notify::new(),
            spawned: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SolverStatus {
        self.lock().status
    }

    pub fn is_started(&self) -> bool {
        self.status() == SolverStatus::Started
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == SolverStatus::Stopped
    }

    pub fn is_destroyed(&self) -> bool {
        self.status() == SolverStatus::Destroyed
    }

    /// Spawn the executor's context. Can only be done once.
    pub fn spawn(
        self: &Arc<Self>,
        listener: BestSolutionListener,
    ) -> Result<JoinHandle<()>, SolverError> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return Err(SolverError::AlreadyRunning);
        }
        let executor = Arc::clone(self);
        Ok(tokio::spawn(async move { executor.run(listener).await }))
    }

    /// Request a search over `solution`. Valid only while stopped.
    pub fn start(&self, solution: Solution) -> Result<(), SolverError> {
        let mut inner = self.lock();
        match inner.status {
            SolverStatus::Destroyed => return Err(SolverError::Destroyed),
            SolverStatus::Stopped => {}
            from => {
                return Err(SolverError::InvalidTransition {
                    from,
                    to: SolverStatus::Starting,
                });
            }
        }
        inner.pending_start = Some(solution);
        inner.status = SolverStatus::Starting;
        drop(inner);

        info!(engine = %self.engine.name(), "Solver start requested");
        self.start_signal.notify_one();
        Ok(())
    }

    /// Request early termination. Cooperative: the search loop exits at its
    /// next suspension point and the status settles on `Stopped`.
    pub fn stop(&self) {
        let mut inner = self.lock();
        match inner.status {
            SolverStatus::Started => {
                inner.status = SolverStatus::Stopping;
                if let Some(session) = &inner.session {
                    session.terminate.notify_one();
                }
                info!("Solver stop requested");
            }
            SolverStatus::Starting => {
                inner.pending_start = None;
                inner.status = SolverStatus::Stopped;
                info!("Solver start cancelled");
            }
            SolverStatus::Stopping | SolverStatus::Stopped | SolverStatus::Destroyed => {}
        }
    }

    /// Forward a change batch to the running search.
    pub fn submit_changes(&self, changes: Vec<ChangeOp>) -> Result<(), SolverError> {
        let inner = self.lock();
        if inner.status != SolverStatus::Started {
            return Err(SolverError::NotStarted(inner.status));
        }
        let Some(session) = &inner.session else {
            return Err(SolverError::NotStarted(inner.status));
        };
        debug!(changes = changes.len(), "Submitting change batch");
        session
            .changes_tx
            .send(changes)
            .map_err(|_| SolverError::NotStarted(inner.status))
    }

    /// Terminal. Stops a running search and unblocks a waiting context.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        if inner.status == SolverStatus::Destroyed {
            return;
        }
        inner.status = SolverStatus::Destroyed;
        inner.pending_start = None;
        if let Some(session) = &inner.session {
            session.terminate.notify_one();
        }
        drop(inner);

        self.start_signal.notify_one();
        info!("Solver executor destroyed");
    }

    async fn run(self: Arc<Self>, listener: BestSolutionListener) {
        loop {
            self.start_signal.notified().await;

            let (solution, changes_rx, terminate) = {
                let mut inner = self.lock();
                if inner.status == SolverStatus::Destroyed {
                    break;
                }
                if inner.status != SolverStatus::Starting {
                    continue;
                }
                let Some(solution) = inner.pending_start.take() else {
                    continue;
                };
                let (changes_tx, changes_rx) = mpsc::unbounded_channel();
                let terminate = Arc::new(Notify::new());
                inner.session = Some(Session {
                    changes_tx,
                    terminate: Arc::clone(&terminate),
                });
                inner.status = SolverStatus::Started;
                (solution, changes_rx, terminate)
            };

            info!(
                solution_id = %solution.id(),
                tasks = solution.real_task_count(),
                "Solver started"
            );
            if let Err(e) = self.solve(solution, changes_rx, &terminate, &listener).await {
                error!(error = %e, "Solver run aborted");
            }

            let mut inner = self.lock();
            inner.session = None;
            if inner.status == SolverStatus::Destroyed {
                break;
            }
            inner.status = SolverStatus::Stopped;
            drop(inner);
            info!("Solver stopped");
        }
        debug!("Solver context exited");
    }

    async fn solve(
        &self,
        mut solution: Solution,
        mut changes_rx: mpsc::UnboundedReceiver<Vec<ChangeOp>>,
        terminate: &Notify,
        listener: &BestSolutionListener,
    ) -> Result<(), ModelError> {
        self.engine.construct(&mut solution)?;
        let mut best = self.engine.score(&solution);
        self.emit(&solution, best, true, listener);

        let mut ticker = tokio::time::interval(self.improve_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = terminate.notified() => break,

                batch = changes_rx.recv() => {
                    let Some(batch) = batch else { break };
                    let mut applied = batch.len();
                    solution.apply_changes(&batch)?;
                    while let Ok(more) = changes_rx.try_recv() {
                        applied += more.len();
                        solution.apply_changes(&more)?;
                    }
                    self.engine.construct(&mut solution)?;
                    best = self.engine.score(&solution);
                    debug!(changes = applied, score = %best, "Change batches applied");
                    self.emit(&solution, best, changes_rx.is_empty(), listener);
                }

                _ = ticker.tick() => {
                    if self.engine.improve(&mut solution)? {
                        let score = self.engine.score(&solution);
                        if score > best {
                            best = score;
                            trace!(score = %best, "Improved solution");
                            self.emit(&solution, best, changes_rx.is_empty(), listener);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        solution: &Solution,
        score: Score,
        every_change_processed: bool,
        listener: &BestSolutionListener,
    ) {
        if !solution.is_initialized() || self.status() != SolverStatus::Started {
            return;
        }
        listener(BestSolutionEvent {
            solution: Arc::new(solution.clone()),
            score,
            every_change_processed,
        });
    }
}
