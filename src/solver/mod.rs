//! Optimizer executor: lifecycle, engine contract and the default engine.

pub mod engine;
pub mod executor;
pub mod state;

pub use engine::{GreedyEngine, Score, SolverEngine};
pub use executor::{BestSolutionEvent, BestSolutionListener, SolverExecutor};
pub use state::SolverStatus;
