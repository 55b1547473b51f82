//! Solution processor: publishes a bounded window of each worker's chain.
//!
//! Single consumer. A solution is handed over through a one-slot channel and
//! processed to completion before the next one is accepted; a hand-over while
//! busy is rejected with [`ProcessorError::Busy`], never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::types::{ProcessingOutcome, ProcessingResult};
use crate::error::{ProcessorError, TrackerError};
use crate::model::Solution;
use crate::store::{AssignmentRecord, AssignmentStore};
use crate::tracker::{PublishItem, TaskTracker};

/// Callback invoked on the processor's context after each solution.
pub type ProcessedListener = Arc<dyn Fn(ProcessingResult) + Send + Sync>;

/// Build the publish batch for a solution.
///
/// Every task except placeholders yields an item carrying its chain index.
/// Items start visible iff the task is pinned; then, per enabled non-fallback
/// worker, not-yet-visible items are promoted in chain order until the worker
/// has `window` visible items.
pub fn build_publish_items(solution: &Solution, window: usize) -> Vec<PublishItem> {
    let mut items = Vec::new();
    for worker in solution.workers() {
        let start = items.len();
        let mut visible_count = 0usize;
        for (index, task) in solution
            .chain(&worker.entity_id)
            .filter(|t| !t.is_placeholder())
            .enumerate()
        {
            visible_count += usize::from(task.pinned());
            items.push(PublishItem {
                container_id: task.container_id.clone(),
                task_id: task.id,
                process_instance_id: task.process_instance_id,
                assigned_user: worker.entity_id.clone(),
                index: i32::try_from(index).unwrap_or(i32::MAX),
                visible: task.pinned(),
            });
        }

        if worker.is_fallback() || !worker.enabled {
            continue;
        }
        for item in &mut items[start..] {
            if visible_count >= window {
                break;
            }
            if !item.visible {
                item.visible = true;
                visible_count += 1;
            }
        }
    }
    items
}

pub struct SolutionProcessor {
    tracker: Arc<dyn TaskTracker>,
    store: Option<Arc<dyn AssignmentStore>>,
    target_user: String,
    publish_window_size: usize,
    processing: AtomicBool,
    destroyed: AtomicBool,
    handoff_tx: mpsc::Sender<Arc<Solution>>,
    handoff_rx: Mutex<Option<mpsc::Receiver<Arc<Solution>>>>,
    shutdown: Notify,
}

impl SolutionProcessor {
    pub fn new(
        tracker: Arc<dyn TaskTracker>,
        store: Option<Arc<dyn AssignmentStore>>,
        target_user: impl Into<String>,
        publish_window_size: usize,
    ) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        Self {
            tracker,
            store,
            target_user: target_user.into(),
            publish_window_size,
            processing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            handoff_tx,
            handoff_rx: Mutex::new(Some(handoff_rx)),
            shutdown: Notify::new(),
        }
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Hand a solution over for publication.
    pub fn process(&self, solution: Arc<Solution>) -> Result<(), ProcessorError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ProcessorError::Destroyed);
        }
        if self.processing.swap(true, Ordering::SeqCst) {
            return Err(ProcessorError::Busy(solution.id()));
        }
        let solution_id = solution.id();
        if self.handoff_tx.try_send(solution).is_err() {
            self.processing.store(false, Ordering::SeqCst);
            return Err(ProcessorError::Busy(solution_id));
        }
        debug!(solution_id = %solution_id, "Solution handed to processor");
        Ok(())
    }

    /// Spawn the processor's context. Can only be done once.
    pub fn spawn(
        self: &Arc<Self>,
        listener: ProcessedListener,
    ) -> Result<JoinHandle<()>, ProcessorError> {
        let rx = self
            .handoff_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ProcessorError::AlreadyRunning)?;
        let processor = Arc::clone(self);
        Ok(tokio::spawn(async move { processor.run(rx, listener).await }))
    }

    /// Stop accepting work and unblock the waiting context. An in-flight
    /// publish call is left to complete.
    pub fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
            info!("Solution processor destroyed");
        }
    }

    async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Arc<Solution>>,
        listener: ProcessedListener,
    ) {
        info!(
            window = self.publish_window_size,
            user = %self.target_user,
            "Solution processor started"
        );
        loop {
            let solution = tokio::select! {
                _ = self.shutdown.notified() => break,
                received = rx.recv() => match received {
                    Some(solution) => solution,
                    None => break,
                },
            };
            if self.destroyed.load(Ordering::SeqCst) {
                break;
            }

            let result = self.process_one(solution).await;
            self.processing.store(false, Ordering::SeqCst);
            listener(result);
        }
        info!("Solution processor shutting down");
    }

    async fn process_one(&self, solution: Arc<Solution>) -> ProcessingResult {
        let solution_id = solution.id();
        let outcome = self.publish(&solution).await;
        match &outcome {
            ProcessingOutcome::Published { result, items } if result.is_success() => {
                info!(solution_id = %solution_id, items, "Solution published");
            }
            ProcessingOutcome::Published { result, items } => {
                warn!(
                    solution_id = %solution_id,
                    items,
                    batch_error = ?result.error,
                    item_errors = result.item_errors.len(),
                    "Solution published with errors"
                );
            }
            ProcessingOutcome::TransportFailed(e) => {
                warn!(solution_id = %solution_id, error = %e, "Publish did not reach the task tracker");
            }
            ProcessingOutcome::Failed(e) => {
                error!(solution_id = %solution_id, error = %e, "Solution processing failed");
            }
        }
        ProcessingResult {
            solution_id,
            solution,
            outcome,
        }
    }

    async fn publish(&self, solution: &Solution) -> ProcessingOutcome {
        if let Err(e) = solution.check_invariants() {
            return ProcessingOutcome::Failed(e.to_string());
        }
        trace_solution(solution);

        let items = build_publish_items(solution, self.publish_window_size);
        for item in &items {
            trace!(
                task_id = %item.task_id,
                user = %item.assigned_user,
                index = item.index,
                visible = item.visible,
                "Publish item"
            );
        }

        // Isolated so that a panicking tracker surfaces as a failed outcome.
        let tracker = Arc::clone(&self.tracker);
        let user = self.target_user.clone();
        let batch = items.clone();
        let joined = tokio::spawn(async move { tracker.publish(&batch, &user).await }).await;

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(TrackerError::Transport(e))) => return ProcessingOutcome::TransportFailed(e),
            Ok(Err(e)) => return ProcessingOutcome::Failed(e.to_string()),
            Err(e) => return ProcessingOutcome::Failed(format!("publish task panicked: {e}")),
        };

        if let Some(store) = &self.store {
            for item in items.iter().filter(|i| result.applied(i.task_id)) {
                if let Err(e) = store.upsert(&AssignmentRecord::from_item(item)).await {
                    warn!(task_id = %item.task_id, error = %e, "Failed to store published assignment");
                }
            }
        }

        ProcessingOutcome::Published {
            result,
            items: items.len(),
        }
    }
}

fn trace_solution(solution: &Solution) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    for worker in solution.workers() {
        let chain: Vec<String> = solution
            .chain(&worker.entity_id)
            .map(|t| {
                if t.pinned() {
                    format!("{}*", t.id)
                } else {
                    t.id.to_string()
                }
            })
            .collect();
        trace!(worker = %worker.entity_id, chain = %chain.join(" -> "), "Solution chain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::model::{ChangeOp, FALLBACK_WORKER_ID, OrganizationalEntity, Task, TaskId, Worker};
    use crate::store::InMemoryAssignmentStore;
    use crate::tracker::{
        InMemoryTaskTracker, PublishError, PublishErrorCode, PublishResult, TaskSnapshot,
        TaskStatus,
    };
    use tokio::time::timeout;

    fn task(id: i64) -> Task {
        Task::new(TaskId(id), format!("task-{id}"), 1)
            .with_process("hr", "hr.review", 100 + id)
            .with_potential_owners([OrganizationalEntity::Group("staff".into())])
    }

    fn worker(id: &str) -> Worker {
        Worker::new(id).with_groups(["staff"])
    }

    /// alice: 1* 2 3 4; bob: 5; fallback: 6 plus placeholders.
    fn solution() -> Solution {
        let mut s = Solution::new();
        s.ensure_placeholders().unwrap();
        let mut ops = vec![ChangeOp::AssignTask { task: task(1), worker: worker("alice"), pin: true }];
        for id in 2..=4 {
            ops.push(ChangeOp::AssignTask { task: task(id), worker: worker("alice"), pin: false });
        }
        ops.push(ChangeOp::AssignTask { task: task(5), worker: worker("bob"), pin: false });
        ops.push(ChangeOp::AssignTask { task: task(6), worker: Worker::fallback(), pin: false });
        s.apply_changes(&ops).unwrap();
        s
    }

    fn visible(items: &[PublishItem], user: &str) -> Vec<i64> {
        items
            .iter()
            .filter(|i| i.assigned_user == user && i.visible)
            .map(|i| i.task_id.0)
            .collect()
    }

    #[test]
    fn window_counts_pinned_items() {
        let items = build_publish_items(&solution(), 2);
        assert_eq!(items.len(), 6);
        assert_eq!(visible(&items, "alice"), vec![1, 2]);
        assert_eq!(visible(&items, "bob"), vec![5]);

        let indices: Vec<i32> = items
            .iter()
            .filter(|i| i.assigned_user == "alice")
            .map(|i| i.index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn newly_visible_items_never_exceed_window() {
        let s = solution();
        for window in 1..=5 {
            let items = build_publish_items(&s, window);
            for w in s.workers() {
                let newly = items
                    .iter()
                    .filter(|i| i.assigned_user == w.entity_id && i.visible)
                    .filter(|i| !s.task(i.task_id).is_some_and(|t| t.pinned()))
                    .count();
                assert!(newly <= window, "{} promoted {newly} > {window}", w.entity_id);
            }
        }
    }

    #[test]
    fn fallback_and_placeholders_are_never_promoted() {
        let items = build_publish_items(&solution(), 3);
        assert!(visible(&items, FALLBACK_WORKER_ID).is_empty());
        assert!(items.iter().all(|i| !i.task_id.is_reserved()));
        assert!(items.iter().any(|i| i.task_id == TaskId(6)));
    }

    #[test]
    fn disabled_workers_are_not_promoted() {
        let mut s = solution();
        s.apply_change(&ChangeOp::AddTask(task(7))).unwrap();
        s.apply_change(&ChangeOp::AssignTask { task: task(7), worker: worker("carol"), pin: true })
            .unwrap();
        s.apply_change(&ChangeOp::AssignTask { task: task(8), worker: worker("carol"), pin: false })
            .unwrap();
        s.worker_mut("carol").unwrap().enabled = false;
        let items = build_publish_items(&s, 2);
        assert_eq!(visible(&items, "carol"), vec![7]);
    }

    fn tracker_for(s: &Solution) -> Arc<InMemoryTaskTracker> {
        Arc::new(InMemoryTaskTracker::with_tasks(
            s.real_tasks()
                .map(|t| TaskSnapshot::new(t.id, TaskStatus::Ready)),
        ))
    }

    fn channel_listener() -> (ProcessedListener, mpsc::UnboundedReceiver<ProcessingResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: ProcessedListener = Arc::new(move |result| {
            let _ = tx.send(result);
        });
        (listener, rx)
    }

    #[tokio::test]
    async fn publishes_and_stores_applied_items() {
        let s = Arc::new(solution());
        let tracker = tracker_for(&s);
        // Pinned task 1 is reserved by alice, as a pinned task would be.
        tracker
            .set_status(TaskId(1), TaskStatus::Reserved, Some("alice"))
            .await;
        let store = Arc::new(InMemoryAssignmentStore::new());
        let processor = Arc::new(SolutionProcessor::new(
            tracker.clone(),
            Some(store.clone()),
            "planner",
            2,
        ));
        let (listener, mut results) = channel_listener();
        processor.spawn(listener).unwrap();

        processor.process(Arc::clone(&s)).unwrap();
        let result = timeout(Duration::from_secs(2), results.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.solution_id, s.id());
        assert!(!result.is_fatal());
        assert!(matches!(
            &result.outcome,
            ProcessingOutcome::Published { result, items: 6 } if result.is_success()
        ));
        assert!(!processor.is_processing());
        assert_eq!(store.len().await, 6);
        assert_eq!(
            tracker.task(TaskId(2)).await.unwrap().status,
            TaskStatus::Reserved
        );
        assert_eq!(tracker.publish_calls().await[0].on_behalf_of, "planner");
        processor.destroy();
    }

    #[tokio::test]
    async fn busy_processor_rejects_second_solution() {
        let s = Arc::new(solution());
        let processor = SolutionProcessor::new(tracker_for(&s), None, "planner", 2);
        processor.process(Arc::clone(&s)).unwrap();
        assert!(processor.is_processing());
        assert!(matches!(
            processor.process(s),
            Err(ProcessorError::Busy(_))
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_transient() {
        let s = Arc::new(solution());
        let tracker = tracker_for(&s);
        tracker.script_publish_failure("connection refused").await;
        let processor = Arc::new(SolutionProcessor::new(tracker, None, "planner", 2));
        let (listener, mut results) = channel_listener();
        processor.spawn(listener).unwrap();

        processor.process(s).unwrap();
        let result = timeout(Duration::from_secs(2), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_transient());
        assert!(!result.is_fatal());
    }

    #[tokio::test]
    async fn unrecoverable_publish_error_is_fatal() {
        let s = Arc::new(solution());
        let tracker = tracker_for(&s);
        tracker
            .script_publish(PublishResult::batch_error(PublishError::new(
                PublishErrorCode::UnexpectedError,
                "server error",
            )))
            .await;
        let store = Arc::new(InMemoryAssignmentStore::new());
        let processor = Arc::new(SolutionProcessor::new(
            tracker,
            Some(store.clone()),
            "planner",
            2,
        ));
        let (listener, mut results) = channel_listener();
        processor.spawn(listener).unwrap();

        processor.process(s).unwrap();
        let result = timeout(Duration::from_secs(2), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_fatal());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn broken_solution_fails_without_publishing() {
        // No placeholders: the working-set invariant does not hold.
        let s = Arc::new(Solution::new());
        let tracker = Arc::new(InMemoryTaskTracker::new());
        let processor = Arc::new(SolutionProcessor::new(tracker.clone(), None, "planner", 2));
        let (listener, mut results) = channel_listener();
        processor.spawn(listener).unwrap();

        processor.process(s).unwrap();
        let result = timeout(Duration::from_secs(2), results.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result.outcome, ProcessingOutcome::Failed(_)));
        assert!(tracker.publish_calls().await.is_empty());
    }

    #[tokio::test]
    async fn destroy_unblocks_and_rejects() {
        let processor = Arc::new(SolutionProcessor::new(
            Arc::new(InMemoryTaskTracker::new()),
            None,
            "planner",
            2,
        ));
        let (listener, _results) = channel_listener();
        let handle = processor.spawn(listener.clone()).unwrap();
        assert!(matches!(
            processor.spawn(listener),
            Err(ProcessorError::AlreadyRunning)
        ));

        processor.destroy();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(matches!(
            processor.process(Arc::new(solution())),
            Err(ProcessorError::Destroyed)
        ));
    }
}
