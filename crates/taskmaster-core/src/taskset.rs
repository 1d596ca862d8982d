use crate::error::{Result, TaskError};
use crate::graph;
use crate::task::{
    clamp_complexity, cmp_task_ids, format_task_id, parse_task_id, QualityGate, Task, TaskDraft,
};
use crate::types::{Phase, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate counters. Always derived from the task list, never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub scored: usize,
    pub flagged: usize,
    pub average_complexity: Option<f64>,
}

impl Summary {
    pub fn compute(tasks: &[Task]) -> Self {
        let mut summary = Summary {
            total: tasks.len(),
            ..Default::default()
        };
        let mut complexity_sum: u32 = 0;
        for task in tasks {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Blocked => summary.blocked += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
            if let Some(c) = task.complexity {
                summary.scored += 1;
                complexity_sum += u32::from(c);
            }
            if task.split_required {
                summary.flagged += 1;
            }
        }
        if summary.scored > 0 {
            let avg = f64::from(complexity_sum) / summary.scored as f64;
            summary.average_complexity = Some((avg * 100.0).round() / 100.0);
        }
        summary
    }

    pub fn closed(&self) -> usize {
        self.completed + self.cancelled
    }

    /// "3/5 completed, 1 in progress, 1 blocked, 0 cancelled"
    pub fn line(&self) -> String {
        format!(
            "{}/{} completed, {} in progress, {} blocked, {} cancelled",
            self.completed, self.total, self.in_progress, self.blocked, self.cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// PhaseBoundary
// ---------------------------------------------------------------------------

/// Suspend point recorded when a phase closes and the next work is in a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoundary {
    pub from: Phase,
    pub to: Phase,
}

// ---------------------------------------------------------------------------
// TaskSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSet {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default = "default_next_seq")]
    next_seq: u32,
    #[serde(default)]
    pub(crate) tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) phase_boundary: Option<PhaseBoundary>,
    #[serde(default)]
    summary: Summary,
}

fn default_next_seq() -> u32 {
    1
}

impl TaskSet {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            slug: slug.into(),
            title: title.into(),
            description: None,
            created: now,
            updated: now,
            next_seq: default_next_seq(),
            tasks: Vec::new(),
            phase_boundary: None,
            summary: Summary::default(),
        }
    }

    // ---------------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------------

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::TaskNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn phase_boundary(&self) -> Option<PhaseBoundary> {
        self.phase_boundary
    }

    /// The id the next created task will receive.
    pub fn peek_next_id(&self) -> String {
        format_task_id(self.next_seq)
    }

    /// Pending, within the ceiling, not flagged, and every dependency completed.
    pub fn get_available(&self) -> Vec<&Task> {
        let completed: HashSet<&str> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();
        let mut available: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.within_ceiling()
                    && !t.split_required
                    && t.blocked_by.iter().all(|d| completed.contains(d.as_str()))
            })
            .collect();
        available.sort_by(|a, b| cmp_task_ids(&a.id, &b.id));
        available
    }

    /// Dependencies of `id` that are not yet completed.
    pub fn unmet_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let task = self.get(id)?;
        Ok(task
            .blocked_by
            .iter()
            .filter(|d| {
                self.get(d)
                    .map(|dep| dep.status != TaskStatus::Completed)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    /// True while any task of `phase` is neither completed nor cancelled.
    pub fn phase_open(&self, phase: Phase) -> bool {
        self.tasks.iter().any(|t| t.phase == phase && t.is_open())
    }

    /// Every task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_open())
    }

    // ---------------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------------

    /// Insert a batch of drafts. Either the whole batch lands or nothing does.
    ///
    /// Explicit ids must be unique and continue the sequence. `blockedBy` may
    /// point forward inside the batch or at tasks already in this set.
    pub fn create_tasks(&mut self, drafts: Vec<TaskDraft>) -> Result<Vec<String>> {
        let mut staged = self.clone();
        let mut seen: HashSet<String> = staged.tasks.iter().map(|t| t.id.clone()).collect();
        let mut assigned = Vec::with_capacity(drafts.len());

        for (offset, draft) in drafts.iter().enumerate() {
            let expected = format_task_id(staged.next_seq + offset as u32);
            let id = match &draft.id {
                Some(explicit) => {
                    if seen.contains(explicit) {
                        return Err(TaskError::Validation(format!(
                            "duplicate task id {explicit}"
                        )));
                    }
                    let seq = parse_task_id(explicit)
                        .map_err(|_| TaskError::Validation(format!("malformed id {explicit}")))?;
                    if format_task_id(seq) != expected {
                        return Err(TaskError::Validation(format!(
                            "ids must be sequential: expected {expected}, got {explicit}"
                        )));
                    }
                    explicit.clone()
                }
                None => expected,
            };
            seen.insert(id.clone());
            assigned.push(id);
        }

        for (draft, id) in drafts.iter().zip(&assigned) {
            if let Some(missing) = draft.blocked_by.iter().find(|r| !seen.contains(*r)) {
                return Err(TaskError::DanglingReference {
                    task: id.clone(),
                    reference: missing.clone(),
                });
            }
        }

        for (draft, id) in drafts.into_iter().zip(&assigned) {
            staged.tasks.push(Task::from_draft(id.clone(), draft));
        }
        staged.next_seq += assigned.len() as u32;
        staged.relink();
        graph::validate(&mut staged)?;
        staged.touch();

        *self = staged;
        Ok(assigned)
    }

    /// Apply a status change, enforcing the task state machine.
    pub fn update_status(&mut self, id: &str, new_status: TaskStatus) -> Result<Task> {
        let task = self.get_mut(id)?;
        if !task.status.can_transition_to(new_status) {
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: new_status.to_string(),
            });
        }
        let now = Utc::now();
        match new_status {
            TaskStatus::InProgress => task.timestamps.started = Some(now),
            TaskStatus::Completed => task.timestamps.completed = Some(now),
            _ => {}
        }
        if task.status == TaskStatus::Blocked {
            task.blocker = None;
        }
        task.status = new_status;
        let updated = task.clone();
        self.touch();
        Ok(updated)
    }

    /// Manual hold: pending -> blocked, remembering why.
    pub fn hold(&mut self, id: &str, reason: impl Into<String>) -> Result<Task> {
        self.update_status(id, TaskStatus::Blocked)?;
        let task = self.get_mut(id)?;
        task.blocker = Some(reason.into());
        Ok(task.clone())
    }

    /// Manual rescore. Clears the split flag once the task fits the ceiling.
    pub fn set_complexity(&mut self, id: &str, complexity: u8) -> Result<()> {
        let task = self.get_mut(id)?;
        task.complexity = Some(clamp_complexity(complexity));
        if task.within_ceiling() {
            task.split_required = false;
        }
        self.touch();
        Ok(())
    }

    pub(crate) fn flag_split_required(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.split_required = true;
        self.touch();
        Ok(())
    }

    pub fn record_quality_gate(&mut self, id: &str, gate: QualityGate) -> Result<QualityGate> {
        let task = self.get_mut(id)?;
        task.quality_gate.merge(gate);
        let merged = task.quality_gate;
        self.touch();
        Ok(merged)
    }

    /// Tick or untick one checklist item. `index` is zero-based; errors
    /// number items from 1, as `show-task` does.
    pub fn set_subtask(&mut self, id: &str, index: usize, completed: bool) -> Result<()> {
        let task = self.get_mut(id)?;
        let len = task.subtasks.len();
        let item = task.subtasks.get_mut(index).ok_or_else(|| {
            TaskError::Validation(format!("{id} has {len} subtasks, no item {}", index + 1))
        })?;
        item.completed = completed;
        self.touch();
        Ok(())
    }

    /// Replace `parent_id` with freshly numbered children.
    ///
    /// Each child inherits the parent's dependencies; every dependent of the
    /// parent waits for all children.
    pub fn replace_with_children(
        &mut self,
        parent_id: &str,
        children: Vec<TaskDraft>,
    ) -> Result<Vec<String>> {
        if children.is_empty() {
            return Err(TaskError::Validation(format!(
                "split of {parent_id} produced no children"
            )));
        }
        let parent = self.get(parent_id)?.clone();
        if parent.status != TaskStatus::Pending {
            return Err(TaskError::Validation(format!(
                "only pending tasks can be split; {parent_id} is {}",
                parent.status
            )));
        }

        let mut child_ids = Vec::with_capacity(children.len());
        let mut child_tasks = Vec::with_capacity(children.len());
        for draft in children {
            let id = self.allocate_id();
            let mut child = Task::from_draft(id.clone(), draft);
            child.blocked_by = parent.blocked_by.clone();
            if child.description.is_none() {
                child.description = parent.description.clone();
            }
            child.tags.extend(parent.tags.iter().cloned());
            child_ids.push(id);
            child_tasks.push(child);
        }

        self.tasks.retain(|t| t.id != parent_id);
        for task in &mut self.tasks {
            if task.blocked_by.remove(parent_id) {
                task.blocked_by.extend(child_ids.iter().cloned());
            }
        }
        self.tasks.extend(child_tasks);
        self.relink();
        self.touch();

        tracing::info!(
            set = %self.slug,
            parent = %parent_id,
            children = %child_ids.join(","),
            "split task"
        );
        Ok(child_ids)
    }

    /// Drop the dependency edge `from -> to` (`from` is blocked by `to`).
    pub fn remove_edge(&mut self, from: &str, to: &str) -> Result<bool> {
        let removed = self.get_mut(from)?.blocked_by.remove(to);
        if let Ok(dep) = self.get_mut(to) {
            dep.blocks.remove(from);
        }
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    pub fn recompute_summary(&mut self) -> Summary {
        self.summary = Summary::compute(&self.tasks);
        self.summary.clone()
    }

    // ---------------------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------------------

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::TaskNotFound(id.to_string()))
    }

    fn allocate_id(&mut self) -> String {
        let id = format_task_id(self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Rebuild every `blocks` set from `blockedBy`.
    pub(crate) fn relink(&mut self) {
        let mut inverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for task in &self.tasks {
            for dep in &task.blocked_by {
                inverse.entry(dep.clone()).or_default().insert(task.id.clone());
            }
        }
        for task in &mut self.tasks {
            task.blocks = inverse.remove(&task.id).unwrap_or_default();
        }
    }

    /// Bump `updated` and refresh the derived summary.
    pub(crate) fn touch(&mut self) {
        self.updated = Utc::now();
        self.recompute_summary();
    }

    pub(crate) fn set_phase_boundary(&mut self, boundary: Option<PhaseBoundary>) {
        self.phase_boundary = boundary;
        self.updated = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str, complexity: u8) -> TaskDraft {
        TaskDraft::new(title).with_complexity(complexity)
    }

    fn three_task_set() -> TaskSet {
        let mut set = TaskSet::new("epic", "Epic");
        set.create_tasks(vec![
            draft("Scaffold", 2),
            draft("Parser", 3).blocked_by(["T-001"]),
            draft("Lexer", 3).blocked_by(["T-001"]),
        ])
        .unwrap();
        set
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let set = three_task_set();
        let ids: Vec<&str> = set.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T-001", "T-002", "T-003"]);
        assert!(set.tasks().iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(set.peek_next_id(), "T-004");
    }

    #[test]
    fn create_maintains_inverse_edges() {
        let set = three_task_set();
        let root = set.get("T-001").unwrap();
        assert_eq!(
            root.blocks.iter().cloned().collect::<Vec<_>>(),
            vec!["T-002".to_string(), "T-003".to_string()]
        );
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let mut set = TaskSet::new("epic", "Epic");
        let err = set
            .create_tasks(vec![
                draft("a", 1).with_id("T-001"),
                draft("b", 1).with_id("T-001"),
            ])
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn create_rejects_gaps_in_sequence() {
        let mut set = TaskSet::new("epic", "Epic");
        let err = set
            .create_tasks(vec![draft("a", 1).with_id("T-001"), draft("b", 1).with_id("T-003")])
            .unwrap_err();
        assert!(err.to_string().contains("sequential"));
    }

    #[test]
    fn create_allows_forward_references_within_batch() {
        let mut set = TaskSet::new("epic", "Epic");
        set.create_tasks(vec![draft("a", 1).blocked_by(["T-002"]), draft("b", 1)])
            .unwrap();
        assert!(set.get("T-002").unwrap().blocks.contains("T-001"));
    }

    #[test]
    fn create_rejects_references_outside_batch() {
        let mut set = TaskSet::new("epic", "Epic");
        let err = set
            .create_tasks(vec![draft("a", 1).blocked_by(["T-009"])])
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::DanglingReference { ref task, ref reference } if task == "T-001" && reference == "T-009"
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn create_rejects_cycles_atomically() {
        let mut set = TaskSet::new("epic", "Epic");
        let err = set
            .create_tasks(vec![
                draft("a", 1).blocked_by(["T-002"]),
                draft("b", 1).blocked_by(["T-001"]),
            ])
            .unwrap_err();
        assert!(matches!(err, TaskError::Cycle { .. }));
        assert!(set.is_empty());
        assert_eq!(set.peek_next_id(), "T-001");
    }

    #[test]
    fn second_batch_continues_sequence_and_may_reference_existing() {
        let mut set = three_task_set();
        let ids = set
            .create_tasks(vec![draft("Docs", 1).blocked_by(["T-002"])])
            .unwrap();
        assert_eq!(ids, vec!["T-004"]);
        assert!(set.get("T-002").unwrap().blocks.contains("T-004"));
    }

    #[test]
    fn available_before_and_after_completion() {
        let mut set = three_task_set();
        let ids: Vec<&str> = set.get_available().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T-001"]);

        set.update_status("T-001", TaskStatus::InProgress).unwrap();
        set.update_status("T-001", TaskStatus::Completed).unwrap();
        let ids: Vec<&str> = set.get_available().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T-002", "T-003"]);
    }

    #[test]
    fn available_excludes_high_and_unscored_tasks() {
        let mut set = TaskSet::new("epic", "Epic");
        set.create_tasks(vec![draft("big", 7), TaskDraft::new("unscored"), draft("ok", 4)])
            .unwrap();
        let ids: Vec<&str> = set.get_available().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["T-003"]);
    }

    #[test]
    fn available_excludes_flagged_tasks() {
        let mut set = three_task_set();
        set.flag_split_required("T-001").unwrap();
        assert!(set.get_available().is_empty());
        set.set_complexity("T-001", 2).unwrap();
        assert_eq!(set.get_available().len(), 1);
    }

    #[test]
    fn status_timestamps() {
        let mut set = three_task_set();
        let started = set.update_status("T-001", TaskStatus::InProgress).unwrap();
        assert!(started.timestamps.started.is_some());
        assert!(started.timestamps.completed.is_none());
        let done = set.update_status("T-001", TaskStatus::Completed).unwrap();
        assert!(done.timestamps.completed.is_some());
        assert!(done.timestamps.started <= done.timestamps.completed);
    }

    #[test]
    fn illegal_transition_keeps_previous_state() {
        let mut set = three_task_set();
        set.update_status("T-001", TaskStatus::InProgress).unwrap();
        set.update_status("T-001", TaskStatus::Completed).unwrap();
        let err = set
            .update_status("T-001", TaskStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(set.get("T-001").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn hold_and_release() {
        let mut set = three_task_set();
        let held = set.hold("T-002", "waiting on design").unwrap();
        assert_eq!(held.status, TaskStatus::Blocked);
        assert_eq!(held.blocker.as_deref(), Some("waiting on design"));
        let released = set.update_status("T-002", TaskStatus::Pending).unwrap();
        assert!(released.blocker.is_none());
    }

    #[test]
    fn subtasks_can_be_ticked_and_unticked() {
        let mut set = TaskSet::new("auth", "Auth");
        set.create_tasks(vec![draft("Login", 3).with_subtasks(["form", "session"])])
            .unwrap();
        set.set_subtask("T-001", 1, true).unwrap();
        let items = &set.get("T-001").unwrap().subtasks;
        assert!(!items[0].completed);
        assert!(items[1].completed);

        set.set_subtask("T-001", 1, false).unwrap();
        assert!(!set.get("T-001").unwrap().subtasks[1].completed);
    }

    #[test]
    fn subtask_out_of_range_is_rejected() {
        let mut set = TaskSet::new("auth", "Auth");
        set.create_tasks(vec![draft("Login", 3).with_subtasks(["form", "session"])])
            .unwrap();
        let err = set.set_subtask("T-001", 2, true).unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(err.to_string().contains("no item 3"));
        assert!(set.get("T-001").unwrap().subtasks.iter().all(|s| !s.completed));
    }

    #[test]
    fn summary_line_counts_cancelled() {
        let mut set = three_task_set();
        set.update_status("T-001", TaskStatus::InProgress).unwrap();
        set.update_status("T-003", TaskStatus::Cancelled).unwrap();
        assert_eq!(
            set.recompute_summary().line(),
            "0/3 completed, 1 in progress, 0 blocked, 1 cancelled"
        );
    }

    #[test]
    fn summary_is_idempotent() {
        let mut set = three_task_set();
        set.update_status("T-001", TaskStatus::InProgress).unwrap();
        let first = set.recompute_summary();
        let second = set.recompute_summary();
        assert_eq!(first, second);
        assert_eq!(first.in_progress, 1);
        assert_eq!(first.pending, 2);
        assert_eq!(first.average_complexity, Some(2.67));
    }

    #[test]
    fn summary_tracks_mutations() {
        let mut set = three_task_set();
        set.update_status("T-003", TaskStatus::Cancelled).unwrap();
        assert_eq!(set.summary().cancelled, 1);
        assert_eq!(set.summary().total, 3);
    }

    #[test]
    fn split_rewrites_dependents_to_all_children() {
        let mut set = TaskSet::new("epic", "Epic");
        set.create_tasks(vec![draft("Big", 7), draft("After", 2).blocked_by(["T-001"])])
            .unwrap();
        let children = set
            .replace_with_children("T-001", vec![draft("Part a", 3), draft("Part b", 4)])
            .unwrap();
        assert_eq!(children, vec!["T-003", "T-004"]);
        assert!(set.get("T-001").is_err());
        let after = set.get("T-002").unwrap();
        assert_eq!(
            after.blocked_by.iter().cloned().collect::<Vec<_>>(),
            vec!["T-003".to_string(), "T-004".to_string()]
        );
        assert!(set.get("T-003").unwrap().blocks.contains("T-002"));
        assert_eq!(set.peek_next_id(), "T-005");
    }

    #[test]
    fn split_children_inherit_parent_dependencies() {
        let mut set = three_task_set();
        set.replace_with_children("T-002", vec![draft("x", 1), draft("y", 1)])
            .unwrap();
        for id in ["T-004", "T-005"] {
            assert!(set.get(id).unwrap().blocked_by.contains("T-001"));
        }
        assert!(!set.get("T-001").unwrap().blocks.contains("T-002"));
    }

    #[test]
    fn split_refuses_started_tasks() {
        let mut set = three_task_set();
        set.update_status("T-001", TaskStatus::InProgress).unwrap();
        assert!(set
            .replace_with_children("T-001", vec![draft("x", 1)])
            .is_err());
    }

    #[test]
    fn json_roundtrip_keeps_sequence() {
        let set = three_task_set();
        let json = serde_json::to_string(&set).unwrap();
        let loaded: TaskSet = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.peek_next_id(), "T-004");
        assert_eq!(loaded.tasks().len(), 3);
    }
}
