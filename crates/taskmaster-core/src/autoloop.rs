//! Repeated select / start / execute / complete cycles.
//!
//! The loop never continues past a checkpoint: it pauses with a
//! [`LoopOutcome`] on the iteration cap, a phase boundary, a failed quality
//! gate, an empty queue, or cancellation. Completed work is never reverted and
//! a task that was executing when the loop stopped stays in progress.

use crate::error::{Result, TaskError};
use crate::scheduler::{Completion, Scheduler, Selection};
use crate::task::{QualityGate, Task};
use crate::taskset::{PhaseBoundary, TaskSet};
use crate::types::{Strategy, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Persisted as `loop.json` while a loop is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopControl {
    pub id: Uuid,
    pub set: String,
    pub strategy: Strategy,
    pub max_iterations: u32,
    #[serde(default)]
    pub iterations: u32,
    pub started: DateTime<Utc>,
    /// Task currently being executed by the loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<LoopOutcome>,
}

impl LoopControl {
    pub fn new(set: impl Into<String>, strategy: Strategy, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            set: set.into(),
            strategy,
            max_iterations: max_iterations.max(1),
            iterations: 0,
            started: Utc::now(),
            current: None,
            last_outcome: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_iterations.saturating_sub(self.iterations)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum LoopOutcome {
    MaxIterationsReached,
    PhaseBoundary { boundary: PhaseBoundary },
    QualityGateFailed { task: String, failed: Vec<String> },
    NoAvailableTasks,
    Cancelled,
}

impl LoopOutcome {
    pub fn describe(&self) -> String {
        match self {
            LoopOutcome::MaxIterationsReached => "max iterations reached".into(),
            LoopOutcome::PhaseBoundary { boundary } => format!(
                "phase boundary {} -> {}; run 'taskmaster confirm-phase' to continue",
                boundary.from, boundary.to
            ),
            LoopOutcome::QualityGateFailed { task, failed } => {
                format!("quality gate failed for {task}: {}", failed.join(", "))
            }
            LoopOutcome::NoAvailableTasks => "no available tasks".into(),
            LoopOutcome::Cancelled => "cancelled".into(),
        }
    }
}

/// Carries out a started task and reports its quality checks.
pub trait Executor {
    fn execute(&mut self, task: &Task) -> Result<QualityGate>;
}

/// First half of a step: either a task to execute or a pause.
#[derive(Debug, Clone, PartialEq)]
pub enum Begin {
    Execute(Task),
    Paused(LoopOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Completed(Completion),
    Paused(LoopOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    pub completed: Vec<String>,
    pub outcome: LoopOutcome,
    pub iterations: u32,
}

pub struct AutoLoop {
    scheduler: Scheduler,
    control: LoopControl,
}

impl AutoLoop {
    pub fn new(control: LoopControl, phase_gating: bool) -> Self {
        Self {
            scheduler: Scheduler::new(control.strategy, phase_gating),
            control,
        }
    }

    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    pub fn into_control(self) -> LoopControl {
        self.control
    }

    /// Pick the next task and start it, or explain why the loop pauses.
    ///
    /// A task left in progress by an earlier pause is resumed first.
    pub fn begin(&mut self, set: &mut TaskSet, cancelled: &dyn Fn() -> bool) -> Result<Begin> {
        if cancelled() {
            return Ok(Begin::Paused(self.pause(LoopOutcome::Cancelled)));
        }
        if self.control.iterations >= self.control.max_iterations {
            return Ok(Begin::Paused(self.pause(LoopOutcome::MaxIterationsReached)));
        }

        if let Some(current) = self.control.current.clone() {
            match set.get(&current) {
                Ok(task) if task.status == TaskStatus::InProgress => {
                    tracing::info!(set = %set.slug, task = %current, "resuming task");
                    return Ok(Begin::Execute(task.clone()));
                }
                _ => self.control.current = None,
            }
        }

        let task = match self.scheduler.next(set) {
            Selection::Ready { task, .. } => task,
            Selection::AwaitingConfirmation { boundary } => {
                return Ok(Begin::Paused(
                    self.pause(LoopOutcome::PhaseBoundary { boundary }),
                ))
            }
            Selection::Idle | Selection::Finished => {
                return Ok(Begin::Paused(self.pause(LoopOutcome::NoAvailableTasks)))
            }
        };
        let started = self.scheduler.start(set, &task.id)?;
        self.control.current = Some(started.id.clone());
        tracing::info!(
            set = %set.slug,
            task = %started.id,
            iteration = self.control.iterations + 1,
            max = self.control.max_iterations,
            "loop started task"
        );
        Ok(Begin::Execute(started))
    }

    /// Second half of a step: record the checks and complete the task.
    pub fn finish(
        &mut self,
        set: &mut TaskSet,
        id: &str,
        gate: QualityGate,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Step> {
        if cancelled() {
            set.record_quality_gate(id, gate)?;
            return Ok(Step::Paused(self.pause(LoopOutcome::Cancelled)));
        }
        match self.scheduler.complete(set, id, gate) {
            Ok(done) => {
                self.control.iterations += 1;
                self.control.current = None;
                Ok(Step::Completed(done))
            }
            Err(TaskError::QualityGateFailed { id, failed }) => Ok(Step::Paused(
                self.pause(LoopOutcome::QualityGateFailed { task: id, failed }),
            )),
            Err(e) => Err(e),
        }
    }

    /// One full cycle with an in-process executor.
    pub fn step(
        &mut self,
        set: &mut TaskSet,
        executor: &mut dyn Executor,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Step> {
        let task = match self.begin(set, cancelled)? {
            Begin::Execute(task) => task,
            Begin::Paused(outcome) => return Ok(Step::Paused(outcome)),
        };
        let gate = executor.execute(&task)?;
        self.finish(set, &task.id, gate, cancelled)
    }

    /// Step until the loop pauses.
    pub fn run(
        &mut self,
        set: &mut TaskSet,
        executor: &mut dyn Executor,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<LoopReport> {
        let mut completed = Vec::new();
        loop {
            match self.step(set, executor, cancelled)? {
                Step::Completed(done) => completed.push(done.task.id),
                Step::Paused(outcome) => {
                    return Ok(LoopReport {
                        completed,
                        outcome,
                        iterations: self.control.iterations,
                    })
                }
            }
        }
    }

    fn pause(&mut self, outcome: LoopOutcome) -> LoopOutcome {
        tracing::info!(set = %self.control.set, outcome = %outcome.describe(), "loop paused");
        self.control.last_outcome = Some(outcome.clone());
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
