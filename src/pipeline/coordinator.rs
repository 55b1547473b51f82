//! Coordinator: the state machine joining executor, processor and synchronizer.
//!
//! Every callback runs on the context of the component that raised it, so the
//! state below sits behind one lock. The lock is held only for short,
//! non-blocking work: bookkeeping, the in-memory diff, and non-blocking
//! hand-overs. No I/O happens under it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::changes::build_changes;
use super::processor::SolutionProcessor;
use super::types::{ProcessingResult, SyncResult};
use crate::error::ProcessorError;
use crate::model::Solution;
use crate::solver::{BestSolutionEvent, SolverExecutor};

#[derive(Default)]
struct CoordinatorState {
    /// Last solution handed to the processor; the base for change batches.
    current: Option<Arc<Solution>>,
    /// Best solution that arrived while the processor was busy.
    pending: Option<Arc<Solution>>,
    /// Solution whose publish never reached the tracker.
    retry: Option<Arc<Solution>>,
    /// Whether the next sync result may produce a change batch.
    updates_enabled: bool,
    /// When the last publish round completed. Older sync reads are stale.
    last_completion: Option<DateTime<Utc>>,
    /// Lineage discarded after a fatal publish. Late events from it are dropped.
    discarded: Option<Uuid>,
}

pub struct Coordinator {
    executor: Arc<SolverExecutor>,
    processor: Arc<SolutionProcessor>,
    state: Mutex<CoordinatorState>,
}

impl Coordinator {
    pub fn new(executor: Arc<SolverExecutor>, processor: Arc<SolutionProcessor>) -> Self {
        Self {
            executor,
            processor,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_solution(&self) -> Option<Arc<Solution>> {
        self.lock().current.clone()
    }

    pub fn updates_enabled(&self) -> bool {
        self.lock().updates_enabled
    }

    pub fn last_completion(&self) -> Option<DateTime<Utc>> {
        self.lock().last_completion
    }

    /// New best solution from the executor.
    pub fn on_best_solution(&self, event: BestSolutionEvent) {
        if !event.every_change_processed {
            trace!(score = %event.score, "Best solution with unprocessed changes ignored");
            return;
        }
        if !event.solution.is_initialized() {
            trace!("Uninitialized best solution ignored");
            return;
        }

        let mut state = self.lock();
        if state.discarded == Some(event.solution.id()) {
            debug!(solution_id = %event.solution.id(), "Event from discarded solution ignored");
            return;
        }
        // Anything newer supersedes a failed hand-over.
        state.retry = None;

        if self.processor.is_processing() {
            debug!(solution_id = %event.solution.id(), score = %event.score, "Processor busy, solution kept pending");
            state.pending = Some(event.solution);
            return;
        }
        self.hand_over(&mut state, event.solution);
    }

    /// Processor finished with a solution.
    pub fn on_solution_processed(&self, result: ProcessingResult) {
        let mut state = self.lock();

        if result.is_fatal() {
            error!(
                solution_id = %result.solution_id,
                outcome = ?result.outcome,
                "Publishing failed, discarding solution and restarting"
            );
            state.current = None;
            state.pending = None;
            state.retry = None;
            state.updates_enabled = false;
            state.discarded = Some(result.solution_id);
            drop(state);
            self.executor.stop();
            return;
        }

        if result.is_transient() {
            if !is_current(&state, &result.solution) {
                // Replaced by a newer hand-over; that one reports on its own.
                debug!(solution_id = %result.solution_id, "Failed publish superseded by a newer solution");
                return;
            }
            if state.pending.is_none() && !self.processor.is_processing() {
                warn!(solution_id = %result.solution_id, "Publish did not reach the tracker, will retry");
                state.retry = Some(result.solution);
                return;
            }
        }

        // A newer hand-over is already in flight; its completion decides.
        if self.processor.is_processing() {
            return;
        }
        if let Some(next) = state.pending.take() {
            self.hand_over(&mut state, next);
            return;
        }

        state.updates_enabled = true;
        state.last_completion = Some(Utc::now());
        debug!(solution_id = %result.solution_id, "Publish round complete, updates enabled");
    }

    /// Synchronizer read a fresh view of the tracker.
    pub fn on_sync_result(&self, result: SyncResult) {
        let mut state = self.lock();

        if let Some(retry) = state.retry.take() {
            if !is_current(&state, &retry) {
                debug!(solution_id = %retry.id(), "Retry dropped, solution no longer current");
            } else if self.processor.is_processing() {
                state.retry = Some(retry);
                return;
            } else {
                info!(solution_id = %retry.id(), "Retrying publish");
                self.hand_over(&mut state, retry);
                return;
            }
        }

        if !state.updates_enabled {
            trace!("Updates disabled, sync result ignored");
            return;
        }
        if state.last_completion.is_some_and(|done| result.read_start < done) {
            debug!(read_start = %result.read_start, "Stale sync result ignored");
            return;
        }
        let Some(current) = state.current.clone() else {
            return;
        };

        let changes = build_changes(&current, &result);
        if changes.is_empty() {
            trace!("No changes detected");
            return;
        }
        let count = changes.len();
        match self.executor.submit_changes(changes) {
            Ok(()) => {
                state.updates_enabled = false;
                info!(changes = count, solution_id = %current.id(), "Changes submitted");
            }
            Err(e) => warn!(error = %e, "Failed to submit changes"),
        }
    }

    fn hand_over(&self, state: &mut CoordinatorState, solution: Arc<Solution>) {
        state.current = Some(Arc::clone(&solution));
        state.retry = None;
        state.updates_enabled = false;
        match self.processor.process(Arc::clone(&solution)) {
            Ok(()) => {}
            Err(ProcessorError::Busy(_)) => state.pending = Some(solution),
            Err(e) => debug!(error = %e, "Processor unavailable"),
        }
    }
}

/// Whether `solution` is the one last handed to the processor.
fn is_current(state: &CoordinatorState, solution: &Arc<Solution>) -> bool {
    state
        .current
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, solution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::directory::Identity;
    use crate::model::{OrganizationalEntity, TaskId};
    use crate::pipeline::builder::build_initial_solution;
    use crate::pipeline::processor::ProcessedListener;
    use crate::solver::{BestSolutionListener, GreedyEngine, Score};
    use crate::tracker::{
        InMemoryTaskTracker, PlanningRecord, PublishError, PublishErrorCode, PublishResult,
        TaskSnapshot, TaskStatus,
    };
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn snapshot(id: i64) -> TaskSnapshot {
        TaskSnapshot::new(TaskId(id), TaskStatus::Ready)
            .with_potential_owners([OrganizationalEntity::Group("staff".into())])
    }

    fn roster() -> Vec<Identity> {
        vec![Identity::new("alice").with_groups(["staff"])]
    }

    fn assigned_solution(ids: &[i64]) -> Solution {
        let items: Vec<TaskSnapshot> = ids.iter().map(|id| snapshot(*id)).collect();
        let mut solution = build_initial_solution(&items, &roster()).unwrap();
        for id in ids {
            solution.append(TaskId(*id), "alice").unwrap();
        }
        solution
    }

    fn event(solution: &Arc<Solution>) -> BestSolutionEvent {
        BestSolutionEvent {
            solution: Arc::clone(solution),
            score: Score::default(),
            every_change_processed: true,
        }
    }

    struct Fixture {
        coordinator: Coordinator,
        executor: Arc<SolverExecutor>,
        tracker: Arc<InMemoryTaskTracker>,
        processed: mpsc::UnboundedReceiver<ProcessingResult>,
    }

    fn fixture(tasks: &[i64]) -> Fixture {
        let executor = Arc::new(SolverExecutor::new(
            Arc::new(GreedyEngine::new()),
            Duration::from_millis(10),
        ));
        let tracker = Arc::new(InMemoryTaskTracker::with_tasks(
            tasks.iter().map(|id| snapshot(*id)),
        ));
        let processor = Arc::new(SolutionProcessor::new(tracker.clone(), None, "planninguser", 2));
        let (tx, processed) = mpsc::unbounded_channel();
        let listener: ProcessedListener = Arc::new(move |result| {
            let _ = tx.send(result);
        });
        processor.spawn(listener).unwrap();
        Fixture {
            coordinator: Coordinator::new(executor.clone(), processor),
            executor,
            tracker,
            processed,
        }
    }

    async fn next_processed(rx: &mut mpsc::UnboundedReceiver<ProcessingResult>) -> ProcessingResult {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn unprocessed_or_uninitialized_events_are_ignored() {
        let fx = fixture(&[1]);
        let solution = Arc::new(assigned_solution(&[1]));
        let mut ev = event(&solution);
        ev.every_change_processed = false;
        fx.coordinator.on_best_solution(ev);
        assert!(fx.coordinator.current_solution().is_none());

        // Task 1 is known but not yet on any chain.
        let unassigned = Arc::new(build_initial_solution(&[snapshot(1)], &roster()).unwrap());
        assert!(!unassigned.is_initialized());
        fx.coordinator.on_best_solution(event(&unassigned));
        assert!(fx.coordinator.current_solution().is_none());
    }

    #[tokio::test]
    async fn busy_processor_keeps_latest_pending() {
        let mut fx = fixture(&[1, 2]);
        let first = Arc::new(assigned_solution(&[1]));
        let second = Arc::new(assigned_solution(&[1, 2]));
        let third = Arc::new(assigned_solution(&[2]));

        fx.coordinator.on_best_solution(event(&first));
        fx.coordinator.on_best_solution(event(&second));
        fx.coordinator.on_best_solution(event(&third));
        assert!(Arc::ptr_eq(&fx.coordinator.current_solution().unwrap(), &first));
        assert!(!fx.coordinator.updates_enabled());

        let done = next_processed(&mut fx.processed).await;
        assert_eq!(done.solution_id, first.id());
        fx.coordinator.on_solution_processed(done);
        // second was overwritten by third
        assert!(Arc::ptr_eq(&fx.coordinator.current_solution().unwrap(), &third));
        assert!(!fx.coordinator.updates_enabled());

        let done = next_processed(&mut fx.processed).await;
        assert_eq!(done.solution_id, third.id());
        fx.coordinator.on_solution_processed(done);
        assert!(fx.coordinator.updates_enabled());
        assert!(fx.coordinator.last_completion().is_some());
        assert_eq!(fx.tracker.publish_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn fatal_result_discards_state() {
        let mut fx = fixture(&[1]);
        fx.tracker
            .script_publish(PublishResult::batch_error(PublishError::new(
                PublishErrorCode::UnexpectedError,
                "boom",
            )))
            .await;
        let solution = Arc::new(assigned_solution(&[1]));
        fx.coordinator.on_best_solution(event(&solution));

        let done = next_processed(&mut fx.processed).await;
        assert!(done.is_fatal());
        fx.coordinator.on_solution_processed(done);
        assert!(fx.coordinator.current_solution().is_none());
        assert!(!fx.coordinator.updates_enabled());

        // A late event from the discarded lineage is dropped.
        fx.coordinator.on_best_solution(event(&solution));
        assert!(fx.coordinator.current_solution().is_none());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_on_next_sync() {
        let mut fx = fixture(&[1]);
        fx.tracker.script_publish_failure("connection refused").await;
        let solution = Arc::new(assigned_solution(&[1]));
        fx.coordinator.on_best_solution(event(&solution));

        let done = next_processed(&mut fx.processed).await;
        assert!(done.is_transient());
        fx.coordinator.on_solution_processed(done);
        assert!(!fx.coordinator.updates_enabled());

        fx.coordinator.on_sync_result(SyncResult::new(Utc::now(), Vec::new()));
        let done = next_processed(&mut fx.processed).await;
        assert_eq!(done.solution_id, solution.id());
        assert!(!done.is_transient());
        fx.coordinator.on_solution_processed(done);
        assert!(fx.coordinator.updates_enabled());
        assert_eq!(fx.tracker.publish_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_publish_of_replaced_solution_is_not_retried() {
        let mut fx = fixture(&[1, 2]);
        fx.tracker.script_publish_failure("connection refused").await;
        let older = Arc::new(assigned_solution(&[1]));
        let newer = Arc::new(assigned_solution(&[1, 2]));

        fx.coordinator.on_best_solution(event(&older));
        let failed = next_processed(&mut fx.processed).await;
        assert!(failed.is_transient());

        // The processor went idle before reporting, so the newer solution
        // is handed over ahead of the older failure.
        fx.coordinator.on_best_solution(event(&newer));
        assert!(Arc::ptr_eq(&fx.coordinator.current_solution().unwrap(), &newer));
        fx.coordinator.on_solution_processed(failed);

        let done = next_processed(&mut fx.processed).await;
        assert_eq!(done.solution_id, newer.id());
        assert!(!done.is_transient());
        fx.coordinator.on_solution_processed(done);
        assert!(fx.coordinator.updates_enabled());

        fx.coordinator.on_sync_result(SyncResult::new(Utc::now(), Vec::new()));
        assert!(Arc::ptr_eq(&fx.coordinator.current_solution().unwrap(), &newer));
        assert!(
            timeout(Duration::from_millis(50), fx.processed.recv())
                .await
                .is_err()
        );
        assert_eq!(fx.tracker.publish_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn sync_result_submits_changes_once() {
        let mut fx = fixture(&[1]);
        let ignore: BestSolutionListener = Arc::new(|_| {});
        fx.executor.spawn(ignore).unwrap();
        fx.executor.start(assigned_solution(&[1])).unwrap();
        timeout(Duration::from_secs(2), async {
            while !fx.executor.is_started() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let solution = Arc::new(assigned_solution(&[1]));
        fx.coordinator.on_best_solution(event(&solution));
        let done = next_processed(&mut fx.processed).await;
        fx.coordinator.on_solution_processed(done);
        assert!(fx.coordinator.updates_enabled());

        // A read that started before the publish completed is stale.
        let stale = SyncResult::new(
            Utc::now() - chrono::Duration::seconds(10),
            vec![snapshot(1), snapshot(2)],
        );
        fx.coordinator.on_sync_result(stale);
        assert!(fx.coordinator.updates_enabled());

        let fresh = SyncResult::new(Utc::now(), vec![snapshot(1), snapshot(2)]);
        fx.coordinator.on_sync_result(fresh.clone());
        assert!(!fx.coordinator.updates_enabled());

        // Disabled until the next publish round completes.
        fx.coordinator.on_sync_result(fresh);
        assert!(!fx.coordinator.updates_enabled());
        fx.executor.destroy();
    }

    #[tokio::test]
    async fn no_changes_keeps_updates_enabled() {
        let mut fx = fixture(&[1]);
        let solution = Arc::new(assigned_solution(&[1]));
        fx.coordinator.on_best_solution(event(&solution));
        let done = next_processed(&mut fx.processed).await;
        fx.coordinator.on_solution_processed(done);

        let planned = snapshot(1).with_planning(PlanningRecord {
            assigned_user: "alice".into(),
            index: 0,
            visible: false,
        });
        fx.coordinator.on_sync_result(SyncResult::new(Utc::now(), vec![planned]));
        assert!(fx.coordinator.updates_enabled());
    }
}
