//! Persistence of last-known published assignments.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlAssignmentStore;
pub use memory::InMemoryAssignmentStore;
pub use traits::{AssignmentRecord, AssignmentStore};
