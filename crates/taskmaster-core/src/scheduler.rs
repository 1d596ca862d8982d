use crate::error::{Result, TaskError};
use crate::graph::transitive_unblocks;
use crate::task::{cmp_task_ids, QualityGate, Task, COMPLEXITY_CEILING};
use crate::taskset::{PhaseBoundary, TaskSet};
use crate::types::{Strategy, TaskStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What `next` found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum Selection {
    /// Best candidate first; `candidates` holds the full ranked id list.
    Ready { task: Task, candidates: Vec<String> },
    /// A phase closed and progression waits for `confirm_phase`.
    AwaitingConfirmation { boundary: PhaseBoundary },
    /// Work remains but none of it is available.
    Idle,
    /// Every task is completed or cancelled.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub task: Task,
    /// Dependents that became available with this completion.
    pub unblocked: Vec<String>,
    /// Recorded when this completion closed its phase.
    pub boundary: Option<PhaseBoundary>,
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Available tasks ordered best-first by `strategy`.
pub fn rank(set: &TaskSet, strategy: Strategy) -> Vec<&Task> {
    let mut available = set.get_available();
    match strategy {
        Strategy::QuickWin => available.sort_by(|a, b| quick_win(a, b)),
        Strategy::CriticalPath => {
            let mut weighted: Vec<(usize, &Task)> = available
                .into_iter()
                .map(|t| (transitive_unblocks(set, &t.id).len(), t))
                .collect();
            weighted.sort_by(|(wa, a), (wb, b)| {
                wb.cmp(wa)
                    .then_with(|| a.complexity.cmp(&b.complexity))
                    .then_with(|| cmp_task_ids(&a.id, &b.id))
            });
            available = weighted.into_iter().map(|(_, t)| t).collect();
        }
    }
    available
}

fn quick_win(a: &Task, b: &Task) -> Ordering {
    a.complexity
        .cmp(&b.complexity)
        .then_with(|| a.phase.cmp(&b.phase))
        .then_with(|| cmp_task_ids(&a.id, &b.id))
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    pub strategy: Strategy,
    pub phase_gating: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            strategy: Strategy::QuickWin,
            phase_gating: true,
        }
    }
}

impl Scheduler {
    pub fn new(strategy: Strategy, phase_gating: bool) -> Self {
        Self {
            strategy,
            phase_gating,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn next(&self, set: &TaskSet) -> Selection {
        if self.phase_gating {
            if let Some(boundary) = set.phase_boundary() {
                return Selection::AwaitingConfirmation { boundary };
            }
        }
        let ranked = rank(set, self.strategy);
        match ranked.first() {
            Some(best) => Selection::Ready {
                task: (*best).clone(),
                candidates: ranked.iter().map(|t| t.id.clone()).collect(),
            },
            None if set.is_finished() => Selection::Finished,
            None => Selection::Idle,
        }
    }

    /// pending -> in-progress, after dependency and complexity checks.
    ///
    /// Starting a task by id counts as confirming a pending phase boundary.
    pub fn start(&self, set: &mut TaskSet, id: &str) -> Result<Task> {
        let task = set.get(id)?;
        if !task.status.can_transition_to(TaskStatus::InProgress) {
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }
        let complexity = task.complexity.ok_or_else(|| {
            TaskError::Validation(format!("{id} has not been scored; run the complexity gate"))
        })?;
        if complexity > COMPLEXITY_CEILING || task.split_required {
            return Err(TaskError::ComplexityExceeded {
                id: id.to_string(),
                complexity,
                ceiling: COMPLEXITY_CEILING,
            });
        }
        let pending = set.unmet_dependencies(id)?;
        if !pending.is_empty() {
            return Err(TaskError::DependenciesUnmet {
                id: id.to_string(),
                pending,
            });
        }

        let started = set.update_status(id, TaskStatus::InProgress)?;
        if let Some(boundary) = set.phase_boundary() {
            tracing::info!(set = %set.slug, from = %boundary.from, to = %boundary.to, task = %id, "phase confirmed by start");
            set.set_phase_boundary(None);
        }
        Ok(started)
    }

    /// in-progress -> completed, refused while any recorded check failed.
    pub fn complete(&self, set: &mut TaskSet, id: &str, gate: QualityGate) -> Result<Completion> {
        let task = set.get(id)?;
        if !task.status.can_transition_to(TaskStatus::Completed) {
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: TaskStatus::Completed.to_string(),
            });
        }
        let merged = set.record_quality_gate(id, gate)?;
        if merged.has_failure() {
            return Err(TaskError::QualityGateFailed {
                id: id.to_string(),
                failed: merged.failed_checks(),
            });
        }

        let done = set.update_status(id, TaskStatus::Completed)?;
        let available = set.get_available();
        let unblocked: Vec<String> = available
            .iter()
            .filter(|t| done.blocks.contains(&t.id))
            .map(|t| t.id.clone())
            .collect();

        let mut boundary = None;
        if self.phase_gating && !set.phase_open(done.phase) {
            if let Some(to) = available.iter().map(|t| t.phase).min() {
                if to != done.phase {
                    boundary = Some(PhaseBoundary {
                        from: done.phase,
                        to,
                    });
                }
            }
        }
        if let Some(b) = boundary {
            tracing::info!(set = %set.slug, from = %b.from, to = %b.to, "phase boundary reached");
            set.set_phase_boundary(Some(b));
        }

        Ok(Completion {
            task: done,
            unblocked,
            boundary,
        })
    }

    /// Clear a pending phase boundary. Returns the boundary that was cleared.
    pub fn confirm_phase(&self, set: &mut TaskSet) -> Option<PhaseBoundary> {
        let boundary = set.phase_boundary()?;
        set.set_phase_boundary(None);
        tracing::info!(set = %set.slug, from = %boundary.from, to = %boundary.to, "phase confirmed");
        Some(boundary)
    }

    pub fn hold(&self, set: &mut TaskSet, id: &str, reason: &str) -> Result<Task> {
        set.hold(id, reason)
    }

    pub fn release(&self, set: &mut TaskSet, id: &str) -> Result<Task> {
        set.update_status(id, TaskStatus::Pending)
    }

    pub fn cancel(&self, set: &mut TaskSet, id: &str) -> Result<Task> {
        set.update_status(id, TaskStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
