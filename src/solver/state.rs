//! Executor lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of the optimizer executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    /// No search running; waiting for a start request.
    Stopped,
    /// Start requested, engine not yet running.
    Starting,
    /// Engine is searching and accepts change batches.
    Started,
    /// Early termination requested.
    Stopping,
    /// Terminal.
    Destroyed,
}

impl SolverStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: SolverStatus) -> bool {
        use SolverStatus::*;

        matches!(
            (self, target),
            (Stopped, Starting) |
            (Starting, Started) | (Starting, Stopped) |
            (Started, Stopping) | (Started, Stopped) |
            (Stopping, Stopped) |
            // Destroy is reachable from everywhere except itself
            (Stopped | Starting | Started | Stopping, Destroyed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Whether a search is running or about to run.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}
