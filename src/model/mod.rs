//! Assignment model: workers anchoring chains of tasks, with derived timing.

pub mod change;
pub mod entity;
pub mod placeholder;
pub mod solution;
pub mod task;
pub mod worker;

pub use change::ChangeOp;
pub use entity::OrganizationalEntity;
pub use placeholder::{PLACEHOLDER_ID, PLACEHOLDER_IDS, SECONDARY_PLACEHOLDER_ID};
pub use solution::{ChainIter, Solution};
pub use task::{DEFAULT_DURATION, Predecessor, Task, TaskId};
pub use worker::{FALLBACK_WORKER_ID, Worker, is_fallback_worker};
