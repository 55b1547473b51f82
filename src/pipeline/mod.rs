//! The assignment pipeline.
//!
//! 1. `SolutionSynchronizer` reads the tracker: a full read to recover, then
//!    incremental reads while the executor runs
//! 2. `ChangeBuilder` turns a read into a change batch for the executor
//! 3. `SolutionProcessor` publishes each new best solution through a bounded
//!    visibility window
//! 4. `Coordinator` gates the loop so a new batch is built only after the
//!    previous publish round completed

pub mod builder;
pub mod changes;
pub mod coordinator;
pub mod processor;
pub mod synchronizer;
pub mod types;

pub use builder::build_initial_solution;
pub use changes::{ChangeBuilder, build_changes};
pub use coordinator::Coordinator;
pub use processor::{ProcessedListener, SolutionProcessor, build_publish_items};
pub use synchronizer::{SolutionSynchronizer, SyncListener, SyncSettings};
pub use types::{ProcessingOutcome, ProcessingResult, SyncResult};
