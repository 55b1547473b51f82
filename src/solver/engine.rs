//! Optimizer engine contract and the default greedy engine.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::model::{FALLBACK_WORKER_ID, Solution, Task, TaskId, Worker};

/// Two-level score. Compared hard first, then soft; higher is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score {
    pub hard: i64,
    pub soft: i64,
}

impl Score {
    pub fn new(hard: i64, soft: i64) -> Self {
        Self { hard, soft }
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}hard/{}soft", self.hard, self.soft)
    }
}

/// Search strategy driven by the executor.
///
/// `construct` must leave every task assigned; it runs on the initial solution
/// and again after each applied change batch. `improve` runs on idle ticks and
/// reports whether it changed anything.
pub trait SolverEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn score(&self, solution: &Solution) -> Score;

    fn construct(&self, solution: &mut Solution) -> Result<(), ModelError>;

    fn improve(&self, _solution: &mut Solution) -> Result<bool, ModelError> {
        Ok(false)
    }
}

/// Deterministic construction plus a makespan-reducing improvement move.
#[derive(Debug, Clone, Default)]
pub struct GreedyEngine;

impl GreedyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Enabled, non-fallback workers that may hold `task`.
    fn eligible<'a>(solution: &'a Solution, task: &'a Task) -> impl Iterator<Item = &'a Worker> {
        solution
            .workers()
            .filter(move |w| w.enabled && !w.is_fallback() && task.accepts(w))
    }

    /// Eligible worker whose chain ends earliest; ties go to roster order.
    fn least_loaded<'a>(solution: &'a Solution, task: &'a Task) -> Option<&'a Worker> {
        let mut best: Option<(&Worker, i64)> = None;
        for worker in Self::eligible(solution, task) {
            let end = solution.chain_end(&worker.entity_id);
            if best.is_none_or(|(_, e)| end < e) {
                best = Some((worker, end));
            }
        }
        best.map(|(w, _)| w)
    }
}

impl SolverEngine for GreedyEngine {
    fn name(&self) -> &str {
        "greedy"
    }

    fn score(&self, solution: &Solution) -> Score {
        let mut hard = 0;
        let mut soft = 0;
        for task in solution.real_tasks() {
            if !task.is_assigned() || !solution.accepts_owner(task.id) {
                hard -= 1;
            }
            soft -= task.end_time().unwrap_or(0);
        }
        Score::new(hard, soft)
    }

    fn construct(&self, solution: &mut Solution) -> Result<(), ModelError> {
        // Lower priority value means more urgent.
        let mut pending: Vec<(i32, TaskId)> = solution
            .tasks()
            .filter(|t| !t.is_assigned())
            .map(|t| (t.priority, t.id))
            .collect();
        pending.sort();

        for (_, id) in pending {
            let target = match solution.task(id) {
                Some(task) if !task.is_placeholder() => Self::least_loaded(solution, task)
                    .map(|w| w.entity_id.clone())
                    .unwrap_or_else(|| FALLBACK_WORKER_ID.to_string()),
                Some(_) => FALLBACK_WORKER_ID.to_string(),
                None => continue,
            };
            solution.append(id, &target)?;
        }
        Ok(())
    }

    fn improve(&self, solution: &mut Solution) -> Result<bool, ModelError> {
        // Parked work first: anything on the fallback chain that a real worker
        // can now take.
        let parked = solution
            .chain(FALLBACK_WORKER_ID)
            .filter(|t| !t.is_placeholder() && !t.pinned())
            .find_map(|t| Self::least_loaded(solution, t).map(|w| (t.id, w.entity_id.clone())));
        if let Some((id, worker)) = parked {
            solution.append(id, &worker)?;
            return Ok(true);
        }

        let Some((busiest, makespan)) = solution
            .workers()
            .filter(|w| !w.is_fallback())
            .map(|w| (w.entity_id.clone(), solution.chain_end(&w.entity_id)))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        else {
            return Ok(false);
        };

        let Some(tail) = solution.chain(&busiest).last() else {
            return Ok(false);
        };
        if tail.pinned() || tail.is_placeholder() {
            return Ok(false);
        }
        let tail_id = tail.id;
        let duration = tail.duration();

        let target = Self::eligible(solution, tail)
            .filter(|w| w.entity_id != busiest)
            .map(|w| (w.entity_id.clone(), solution.chain_end(&w.entity_id)))
            .filter(|(_, end)| end + duration < makespan)
            .min_by_key(|(_, end)| *end);

        match target {
            Some((worker, _)) => {
                solution.append(tail_id, &worker)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
