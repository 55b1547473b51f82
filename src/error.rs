//! Error types for the task assigner.

use crate::model::TaskId;
use crate::solver::SolverStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Task tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("User directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Assignment store error: {0}")]
    Store(#[from] StoreError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Assignment model errors. Raised by chain operations and invariant checks.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Task {0} not found")]
    UnknownTask(TaskId),

    #[error("Worker {0} not found")]
    UnknownWorker(String),

    #[error("Task {0} cannot be linked after itself")]
    SelfLink(TaskId),

    #[error("Task {task} cannot follow unassigned task {predecessor}")]
    UnassignedPredecessor { task: TaskId, predecessor: TaskId },

    #[error("Placeholder task {0} does not accept modifications")]
    ImmutablePlaceholder(TaskId),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Optimizer executor errors.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Solver cannot transition from {from} to {to}")]
    InvalidTransition { from: SolverStatus, to: SolverStatus },

    #[error("Solver is not started (status: {0})")]
    NotStarted(SolverStatus),

    #[error("Solver executor has been destroyed")]
    Destroyed,

    #[error("Solver executor loop is already running")]
    AlreadyRunning,
}

/// Task-tracking system errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Task tracker request failed: {0}")]
    Transport(String),
}

/// Identity/group directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("User directory lookup failed: {0}")]
    Lookup(String),
}

/// Assignment-state store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Solution processor errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Solution processor is busy with solution {0}")]
    Busy(uuid::Uuid),

    #[error("Solution processor has been destroyed")]
    Destroyed,

    #[error("Solution processor loop is already running")]
    AlreadyRunning,
}

/// Result type alias for the task assigner.
pub type Result<T> = std::result::Result<T, Error>;
