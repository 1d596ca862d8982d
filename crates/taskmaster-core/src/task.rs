use crate::error::{Result, TaskError};
use crate::types::{GateOutcome, Phase, TaskStatus};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Schedulability ceiling: a task is available only at or below this score.
pub const COMPLEXITY_CEILING: u8 = 4;

pub const MIN_COMPLEXITY: u8 = 1;
pub const MAX_COMPLEXITY: u8 = 10;

// ---------------------------------------------------------------------------
// Task IDs
// ---------------------------------------------------------------------------

static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();

fn task_id_re() -> &'static Regex {
    TASK_ID_RE.get_or_init(|| Regex::new(r"^T-(\d{3,})$").unwrap())
}

pub fn format_task_id(seq: u32) -> String {
    format!("T-{seq:03}")
}

/// Sequence number of a `T-NNN` id.
pub fn parse_task_id(id: &str) -> Result<u32> {
    task_id_re()
        .captures(id)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| TaskError::InvalidTaskId(id.to_string()))
}

/// Order ids numerically so `T-1000` sorts after `T-999`.
pub fn cmp_task_ids(a: &str, b: &str) -> Ordering {
    match (parse_task_id(a), parse_task_id(b)) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

impl Subtask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            completed: false,
        }
    }
}

/// Tri-state checks: `None` means the check has not been run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    #[serde(default)]
    pub lint: Option<GateOutcome>,
    #[serde(default)]
    pub typecheck: Option<GateOutcome>,
    #[serde(default)]
    pub tests: Option<GateOutcome>,
}

impl QualityGate {
    pub fn checks(&self) -> [(&'static str, Option<GateOutcome>); 3] {
        [
            ("lint", self.lint),
            ("typecheck", self.typecheck),
            ("tests", self.tests),
        ]
    }

    pub fn failed_checks(&self) -> Vec<String> {
        self.checks()
            .iter()
            .filter(|(_, outcome)| *outcome == Some(GateOutcome::Fail))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn has_failure(&self) -> bool {
        !self.failed_checks().is_empty()
    }

    /// Overlay the checks that `other` actually ran.
    pub fn merge(&mut self, other: QualityGate) {
        if other.lint.is_some() {
            self.lint = other.lint;
        }
        if other.typecheck.is_some() {
            self.typecheck = other.typecheck;
        }
        if other.tests.is_some() {
            self.tests = other.tests;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
}

impl Timestamps {
    pub fn now() -> Self {
        Self {
            created: Utc::now(),
            started: None,
            completed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// `None` until the complexity gate scores the task.
    #[serde(default)]
    pub complexity: Option<u8>,
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,
    #[serde(default)]
    pub blocks: BTreeSet<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub quality_gate: QualityGate,
    pub timestamps: Timestamps,
    #[serde(default)]
    pub split_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            complexity: None,
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            subtasks: Vec::new(),
            phase: Phase::default(),
            tags: BTreeSet::new(),
            quality_gate: QualityGate::default(),
            timestamps: Timestamps::now(),
            split_required: false,
            blocker: None,
        }
    }

    pub fn from_draft(id: impl Into<String>, draft: TaskDraft) -> Self {
        let mut task = Task::new(id, draft.title);
        task.description = draft.description;
        task.complexity = draft.complexity.map(clamp_complexity);
        task.blocked_by = draft.blocked_by;
        task.subtasks = draft.subtasks;
        task.phase = draft.phase;
        task.tags = draft.tags;
        task
    }

    pub fn exceeds_ceiling(&self) -> bool {
        self.complexity.is_some_and(|c| c > COMPLEXITY_CEILING)
    }

    pub fn within_ceiling(&self) -> bool {
        self.complexity.is_some_and(|c| c <= COMPLEXITY_CEILING)
    }

    /// Open tasks still represent outstanding work.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

pub fn clamp_complexity(value: u8) -> u8 {
    value.clamp(MIN_COMPLEXITY, MAX_COMPLEXITY)
}

// ---------------------------------------------------------------------------
// TaskDraft
// ---------------------------------------------------------------------------

/// Task as produced by decomposition, before an id is assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    /// Optional explicit id; must continue the set's sequence when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn blocked_by<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_by.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_subtasks<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtasks.extend(titles.into_iter().map(Subtask::new));
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
