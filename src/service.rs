//! Task assigning service: owns and wires the pipeline components.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AssignerConfig;
use crate::directory::UserDirectory;
use crate::error::{Error, SolverError};
use crate::pipeline::{Coordinator, SolutionProcessor, SolutionSynchronizer, SyncSettings};
use crate::solver::{SolverEngine, SolverExecutor};
use crate::store::AssignmentStore;
use crate::tracker::TaskTracker;

pub struct TaskAssigningService {
    config: AssignerConfig,
    executor: Arc<SolverExecutor>,
    processor: Arc<SolutionProcessor>,
    synchronizer: Arc<SolutionSynchronizer>,
    coordinator: Arc<Coordinator>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskAssigningService {
    pub fn new(
        config: AssignerConfig,
        engine: Arc<dyn SolverEngine>,
        tracker: Arc<dyn TaskTracker>,
        directory: Arc<dyn UserDirectory>,
        store: Option<Arc<dyn AssignmentStore>>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let executor = Arc::new(SolverExecutor::new(engine, config.improve_interval));
        let processor = Arc::new(SolutionProcessor::new(
            Arc::clone(&tracker),
            store.clone(),
            config.target_user.clone(),
            config.publish_window_size,
        ));
        let synchronizer = Arc::new(SolutionSynchronizer::new(
            Arc::clone(&executor),
            tracker,
            directory,
            store,
            SyncSettings {
                sync_interval: config.sync_interval,
                queries_shift: config.sync_queries_shift,
                users_sync_interval: config.users_sync_interval,
            },
        ));
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&executor),
            Arc::clone(&processor),
        ));

        Ok(Self {
            config,
            executor,
            processor,
            synchronizer,
            coordinator,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn executor(&self) -> &Arc<SolverExecutor> {
        &self.executor
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Spawn every component and begin recovery. Can only be called once.
    pub fn start(&self) -> Result<(), Error> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() {
            return Err(SolverError::AlreadyRunning.into());
        }

        let coordinator = Arc::clone(&self.coordinator);
        handles.push(
            self.executor
                .spawn(Arc::new(move |event| coordinator.on_best_solution(event)))?,
        );

        let coordinator = Arc::clone(&self.coordinator);
        handles.push(
            self.processor
                .spawn(Arc::new(move |result| coordinator.on_solution_processed(result)))?,
        );

        let coordinator = Arc::clone(&self.coordinator);
        handles.push(
            self.synchronizer
                .spawn(Arc::new(move |result| coordinator.on_sync_result(result)))?,
        );

        self.synchronizer.start();
        info!(
            window = self.config.publish_window_size,
            target_user = %self.config.target_user,
            "Task assigning service started"
        );
        Ok(())
    }

    /// Destroy every component and wait, bounded, for their contexts to end.
    pub async fn destroy(&self) {
        self.synchronizer.destroy();
        self.processor.destroy();
        self.executor.destroy();

        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        match tokio::time::timeout(self.config.shutdown_timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Background task ended abnormally");
                    }
                }
                info!("Task assigning service destroyed");
            }
            Err(_) => warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Timed out waiting for background tasks"
            ),
        }
    }
}
