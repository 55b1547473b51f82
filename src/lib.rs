//! Task assigner: continuous incremental work assignment.

pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod service;
pub mod solver;
pub mod store;
pub mod tracker;
