//! Bounded multi-pass decomposition.
//!
//! Drives a task set towards the state where every open task scores at or
//! below [`COMPLEXITY_CEILING`]. Scoring and splitting are pluggable through
//! [`Scorer`] and [`Decomposer`]; the driver only owns the pass structure:
//!
//! 1. **Macro**: intake, nothing enforced.
//! 2. **Split**: each pending task above the ceiling is decomposed once.
//! 3. **Score**: every unscored task is scored.
//! 4. **Refine** (until the cap): pending tasks above the ceiling are
//!    decomposed again and their children scored immediately.
//!
//! The loop ends as soon as nothing exceeds the ceiling, or after
//! [`MAX_PASSES`]. Tasks still above the ceiling at the cap are flagged
//! `splitRequired` and stay out of scheduling until split by hand.

use crate::error::{Result, TaskError};
use crate::task::{clamp_complexity, Subtask, Task, TaskDraft, COMPLEXITY_CEILING};
use crate::taskset::TaskSet;
use crate::types::TaskStatus;
use serde::{Deserialize, Serialize};

/// Hard cap on passes, including Macro, Split and Score.
pub const MAX_PASSES: u8 = 5;
/// Macro, Split and Score always run.
pub const MIN_PASSES: u8 = 3;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub trait Scorer {
    /// Complexity in 1..=10. Out-of-range values are clamped by the caller.
    fn score(&self, task: &Task) -> u8;
}

pub trait Decomposer {
    /// Finer-grained replacements for `task`. Empty means it cannot be split.
    fn decompose(&self, task: &Task) -> Vec<TaskDraft>;
}

// ---------------------------------------------------------------------------
// HeuristicScorer
// ---------------------------------------------------------------------------

pub mod thresholds {
    pub const MAX_TITLE_LENGTH: usize = 80;
    pub const MAX_DESCRIPTION_LENGTH: usize = 500;
    /// Every this many checklist items add a point.
    pub const SUBTASKS_PER_POINT: usize = 3;
    pub const BASE_SCORE: u8 = 2;
}

const CONJUNCTIONS: &[&str] = &[" and ", " also ", " plus ", " & ", " as well as "];

const ACTION_VERBS: &[&str] = &[
    "add",
    "fix",
    "update",
    "remove",
    "create",
    "delete",
    "implement",
    "refactor",
    "improve",
    "change",
    "build",
    "configure",
    "migrate",
    "integrate",
    "test",
    "write",
];

const VAGUE_WORDS: &[&str] = &[
    "various",
    "several",
    "multiple",
    "everything",
    "all the",
    "a lot of",
    "numerous",
];

const UNCERTAIN_WORDS: &[&str] = &["maybe", "might", "possibly", "probably", "perhaps", "tbd"];

/// Score with the reasons that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: u8,
    pub reasons: Vec<String>,
}

impl ScoreBreakdown {
    fn add(&mut self, points: u8, reason: impl Into<String>) {
        self.score = self.score.saturating_add(points);
        self.reasons.push(reason.into());
    }
}

/// Text heuristics: length, compound titles, vague scope, checklist size.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn breakdown(&self, task: &Task) -> ScoreBreakdown {
        let mut out = ScoreBreakdown {
            score: thresholds::BASE_SCORE,
            reasons: Vec::new(),
        };
        let title = task.title.to_lowercase();
        let text = match &task.description {
            Some(desc) => format!("{title} {}", desc.to_lowercase()),
            None => title.clone(),
        };

        if task.title.len() > thresholds::MAX_TITLE_LENGTH {
            out.add(1, format!("title is {} chars", task.title.len()));
        }
        if let Some(desc) = &task.description {
            if desc.len() > thresholds::MAX_DESCRIPTION_LENGTH {
                out.add(1, format!("description is {} chars", desc.len()));
            }
        }

        let conjunctions: Vec<&str> = CONJUNCTIONS
            .iter()
            .filter(|c| title.contains(*c))
            .map(|c| c.trim())
            .collect();
        if !conjunctions.is_empty() {
            out.add(2, format!("title joins concerns: {}", conjunctions.join(", ")));
        }

        let verbs = title
            .split_whitespace()
            .filter(|w| ACTION_VERBS.contains(&w.trim_matches(|c: char| !c.is_alphabetic())))
            .count();
        if verbs > 1 {
            out.add(1, format!("{verbs} action verbs in title"));
        }

        if VAGUE_WORDS.iter().any(|w| text.contains(w)) {
            out.add(1, "vague scope");
        }
        if UNCERTAIN_WORDS.iter().any(|w| text.contains(w)) {
            out.add(1, "uncertain scope");
        }

        let checklist = (task.subtasks.len() / thresholds::SUBTASKS_PER_POINT).min(3) as u8;
        if checklist > 0 {
            out.add(checklist, format!("{} checklist items", task.subtasks.len()));
        }

        out.score = clamp_complexity(out.score);
        out
    }
}

impl Scorer for HeuristicScorer {
    fn score(&self, task: &Task) -> u8 {
        self.breakdown(task).score
    }
}

// ---------------------------------------------------------------------------
// OutlineDecomposer
// ---------------------------------------------------------------------------

/// Splits the subtask checklist in two halves, one child per half.
///
/// A task with fewer than two checklist items cannot be split this way.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutlineDecomposer;

impl OutlineDecomposer {
    fn child(parent: &Task, part: usize, items: &[Subtask]) -> TaskDraft {
        let title = match items {
            [only] => only.title.clone(),
            _ => format!("{} ({part}/2)", parent.title),
        };
        let mut draft = TaskDraft::new(title).with_phase(parent.phase);
        draft.subtasks = items.to_vec();
        draft
    }
}

impl Decomposer for OutlineDecomposer {
    fn decompose(&self, task: &Task) -> Vec<TaskDraft> {
        if task.subtasks.len() < 2 {
            return Vec::new();
        }
        let mid = task.subtasks.len().div_ceil(2);
        let (first, second) = task.subtasks.split_at(mid);
        vec![
            Self::child(task, 1, first),
            Self::child(task, 2, second),
        ]
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Macro,
    Split,
    Score,
    Refine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassRecord {
    pub number: u8,
    pub kind: PassKind,
    pub split: usize,
    pub scored: usize,
    /// Open tasks still above the ceiling when the pass ended.
    pub above_ceiling: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub parent: String,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecompositionOutcome {
    Converged,
    IterationCap,
    SplittingDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionReport {
    pub passes: Vec<PassRecord>,
    pub splits: Vec<SplitRecord>,
    pub flagged: Vec<String>,
    pub outcome: DecompositionOutcome,
}

// ---------------------------------------------------------------------------
// ComplexityGate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    pub max_passes: u8,
    pub splitting: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_passes: MAX_PASSES,
            splitting: true,
        }
    }
}

impl GateSettings {
    pub fn new(max_passes: u8, splitting: bool) -> Self {
        Self {
            max_passes: max_passes.clamp(MIN_PASSES, MAX_PASSES),
            splitting,
        }
    }
}

pub struct ComplexityGate<'a> {
    scorer: &'a dyn Scorer,
    decomposer: &'a dyn Decomposer,
    settings: GateSettings,
}

impl<'a> ComplexityGate<'a> {
    pub fn new(
        scorer: &'a dyn Scorer,
        decomposer: &'a dyn Decomposer,
        settings: GateSettings,
    ) -> Self {
        Self {
            scorer,
            decomposer,
            settings: GateSettings::new(settings.max_passes, settings.splitting),
        }
    }

    /// Run the pass loop over the whole set.
    pub fn run(&self, set: &mut TaskSet) -> Result<DecompositionReport> {
        let mut passes = Vec::new();
        let mut splits = Vec::new();

        passes.push(self.record(set, 1, PassKind::Macro, 0, 0));

        if !self.settings.splitting {
            let scored = self.score_unscored(set)?;
            passes.push(self.record(set, 2, PassKind::Score, 0, scored));
            let flagged = self.flag_remaining(set)?;
            let outcome = if flagged.is_empty() {
                DecompositionOutcome::Converged
            } else {
                DecompositionOutcome::SplittingDisabled
            };
            return Ok(DecompositionReport {
                passes,
                splits,
                flagged,
                outcome,
            });
        }

        let (split, _) = self.split_above_ceiling(set, false, &mut splits)?;
        passes.push(self.record(set, 2, PassKind::Split, split, 0));

        let scored = self.score_unscored(set)?;
        passes.push(self.record(set, 3, PassKind::Score, 0, scored));

        let mut number = 3;
        while above_ceiling(set) > 0 && number < self.settings.max_passes {
            number += 1;
            let (split, scored) = self.split_above_ceiling(set, true, &mut splits)?;
            passes.push(self.record(set, number, PassKind::Refine, split, scored));
        }

        let flagged = self.flag_remaining(set)?;
        let outcome = if flagged.is_empty() {
            DecompositionOutcome::Converged
        } else {
            DecompositionOutcome::IterationCap
        };
        Ok(DecompositionReport {
            passes,
            splits,
            flagged,
            outcome,
        })
    }

    /// Split one task by hand and score its children.
    pub fn split_task(&self, set: &mut TaskSet, id: &str) -> Result<Vec<String>> {
        let task = set.get(id)?.clone();
        let drafts = self.decomposer.decompose(&task);
        if drafts.is_empty() {
            return Err(TaskError::Validation(format!(
                "{id} cannot be split further; add checklist items or rescore it"
            )));
        }
        let children = set.replace_with_children(id, drafts)?;
        for child in &children {
            self.score_one(set, child)?;
        }
        Ok(children)
    }

    /// Score a single task, overwriting any existing score.
    pub fn rescore(&self, set: &mut TaskSet, id: &str) -> Result<u8> {
        self.score_one(set, id)
    }

    fn record(
        &self,
        set: &TaskSet,
        number: u8,
        kind: PassKind,
        split: usize,
        scored: usize,
    ) -> PassRecord {
        let record = PassRecord {
            number,
            kind,
            split,
            scored,
            above_ceiling: above_ceiling(set),
        };
        tracing::debug!(
            set = %set.slug,
            pass = number,
            kind = ?kind,
            split,
            scored,
            above = record.above_ceiling,
            "complexity pass"
        );
        record
    }

    fn score_one(&self, set: &mut TaskSet, id: &str) -> Result<u8> {
        let score = clamp_complexity(self.scorer.score(set.get(id)?));
        set.set_complexity(id, score)?;
        Ok(score)
    }

    fn score_unscored(&self, set: &mut TaskSet) -> Result<usize> {
        let ids: Vec<String> = set
            .tasks()
            .iter()
            .filter(|t| t.complexity.is_none())
            .map(|t| t.id.clone())
            .collect();
        for id in &ids {
            self.score_one(set, id)?;
        }
        Ok(ids.len())
    }

    /// Decompose each pending task above the ceiling once. Returns the
    /// number of splits and of children scored.
    fn split_above_ceiling(
        &self,
        set: &mut TaskSet,
        score_children: bool,
        splits: &mut Vec<SplitRecord>,
    ) -> Result<(usize, usize)> {
        let targets: Vec<Task> = set
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.exceeds_ceiling())
            .cloned()
            .collect();

        let mut count = 0;
        let mut scored = 0;
        for parent in targets {
            let drafts = self.decomposer.decompose(&parent);
            if drafts.is_empty() {
                tracing::debug!(task = %parent.id, "decomposer cannot split task");
                continue;
            }
            let children = set.replace_with_children(&parent.id, drafts)?;
            if score_children {
                for child in &children {
                    if set.get(child)?.complexity.is_none() {
                        self.score_one(set, child)?;
                        scored += 1;
                    }
                }
            }
            splits.push(SplitRecord {
                parent: parent.id,
                children,
            });
            count += 1;
        }
        Ok((count, scored))
    }

    fn flag_remaining(&self, set: &mut TaskSet) -> Result<Vec<String>> {
        let ids: Vec<String> = set
            .tasks()
            .iter()
            .filter(|t| t.is_open() && t.exceeds_ceiling())
            .map(|t| t.id.clone())
            .collect();
        for id in &ids {
            set.flag_split_required(id)?;
            tracing::warn!(
                set = %set.slug,
                task = %id,
                ceiling = COMPLEXITY_CEILING,
                "task still above complexity ceiling; flagged splitRequired"
            );
        }
        Ok(ids)
    }
}

fn above_ceiling(set: &TaskSet) -> usize {
    set.tasks()
        .iter()
        .filter(|t| t.is_open() && t.exceeds_ceiling())
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Scores by exact title, 2 otherwise.
    struct TableScorer(HashMap<&'static str, u8>);

    impl Scorer for TableScorer {
        fn score(&self, task: &Task) -> u8 {
            self.0.get(task.title.as_str()).copied().unwrap_or(2)
        }
    }

    /// Splits by exact title into pre-scored children.
    struct TableDecomposer(HashMap<&'static str, Vec<(&'static str, Option<u8>)>>);

    impl Decomposer for TableDecomposer {
        fn decompose(&self, task: &Task) -> Vec<TaskDraft> {
            self.0
                .get(task.title.as_str())
                .map(|children| {
                    children
                        .iter()
                        .map(|(title, c)| {
                            let mut d = TaskDraft::new(*title);
                            d.complexity = *c;
                            d
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    /// Always yields a single child that is just as hard.
    struct Stubborn;

    impl Decomposer for Stubborn {
        fn decompose(&self, task: &Task) -> Vec<TaskDraft> {
            vec![TaskDraft::new(format!("{}'", task.title)).with_complexity(9)]
        }
    }

    #[test]
    fn refine_splits_task_scored_high_after_score_pass() {
        // Unscored at intake, scores 7 in pass 3, refined in pass 4.
        let mut set = TaskSet::new("s3", "Scenario");
        set.create_tasks(vec![
            TaskDraft::new("Payments"),
            TaskDraft::new("Receipts").blocked_by(["T-001"]),
        ])
        .unwrap();
        let scorer = TableScorer(HashMap::from([("Payments", 7)]));
        let decomposer = TableDecomposer(HashMap::from([(
            "Payments",
            vec![("Charge card", Some(3)), ("Refunds", Some(4))],
        )]));
        let gate = ComplexityGate::new(&scorer, &decomposer, GateSettings::default());
        let report = gate.run(&mut set).unwrap();

        assert_eq!(report.outcome, DecompositionOutcome::Converged);
        assert_eq!(report.passes.len(), 4);
        assert_eq!(report.passes[3].kind, PassKind::Refine);
        assert_eq!(
            report.splits,
            vec![SplitRecord {
                parent: "T-001".into(),
                children: vec!["T-003".into(), "T-004".into()],
            }]
        );
        assert!(set.get("T-001").is_err());
        assert_eq!(set.get("T-003").unwrap().complexity, Some(3));
        assert_eq!(set.get("T-004").unwrap().complexity, Some(4));
        let receipts = set.get("T-002").unwrap();
        assert_eq!(
            receipts.blocked_by.iter().cloned().collect::<Vec<_>>(),
            vec!["T-003".to_string(), "T-004".to_string()]
        );
    }

    #[test]
    fn split_pass_handles_high_intake_scores() {
        let mut set = TaskSet::new("s", "S");
        set.create_tasks(vec![TaskDraft::new("Auth").with_complexity(8)])
            .unwrap();
        let scorer = TableScorer(HashMap::new());
        let decomposer = TableDecomposer(HashMap::from([(
            "Auth",
            vec![("Login", None), ("Logout", None)],
        )]));
        let gate = ComplexityGate::new(&scorer, &decomposer, GateSettings::default());
        let report = gate.run(&mut set).unwrap();

        assert_eq!(report.outcome, DecompositionOutcome::Converged);
        assert_eq!(report.passes.len(), 3);
        assert_eq!(report.passes[1].split, 1);
        assert_eq!(report.passes[2].scored, 2);
        assert!(set.tasks().iter().all(|t| t.within_ceiling()));
    }

    #[test]
    fn converges_without_refine_when_everything_fits() {
        let mut set = TaskSet::new("s", "S");
        set.create_tasks(vec![TaskDraft::new("a"), TaskDraft::new("b")])
            .unwrap();
        let scorer = TableScorer(HashMap::new());
        let gate = ComplexityGate::new(
            &scorer,
            &OutlineDecomposer,
            GateSettings::default(),
        );
        let report = gate.run(&mut set).unwrap();
        assert_eq!(report.outcome, DecompositionOutcome::Converged);
        assert_eq!(report.passes.len(), 3);
        assert!(report.flagged.is_empty());
        assert_eq!(set.get_available().len(), 2);
    }

    #[test]
    fn never_exceeds_five_passes_and_flags_leftovers() {
        let mut set = TaskSet::new("s", "S");
        set.create_tasks(vec![
            TaskDraft::new("Monolith").with_complexity(9),
            TaskDraft::new("Small").with_complexity(2),
        ])
        .unwrap();
        let scorer = TableScorer(HashMap::new());
        let gate = ComplexityGate::new(&scorer, &Stubborn, GateSettings::default());
        let report = gate.run(&mut set).unwrap();

        assert!(report.passes.len() <= MAX_PASSES as usize);
        assert_eq!(report.passes.len(), 5);
        assert_eq!(report.outcome, DecompositionOutcome::IterationCap);
        assert_eq!(report.flagged.len(), 1);
        let flagged = set.get(&report.flagged[0]).unwrap();
        assert!(flagged.split_required);
        // The rest of the set stays schedulable.
        let available: Vec<&str> = set.get_available().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(available, vec!["Small"]);
    }

    #[test]
    fn max_passes_is_clamped_to_bounds() {
        assert_eq!(GateSettings::new(9, true).max_passes, MAX_PASSES);
        assert_eq!(GateSettings::new(1, true).max_passes, MIN_PASSES);
    }

    #[test]
    fn lower_cap_stops_earlier() {
        let mut set = TaskSet::new("s", "S");
        set.create_tasks(vec![TaskDraft::new("Monolith").with_complexity(9)])
            .unwrap();
        let scorer = TableScorer(HashMap::new());
        let gate = ComplexityGate::new(
            &scorer,
            &Stubborn,
            GateSettings::new(4, true),
        );
        let report = gate.run(&mut set).unwrap();
        assert_eq!(report.passes.len(), 4);
        assert_eq!(report.outcome, DecompositionOutcome::IterationCap);
    }

    #[test]
    fn splitting_disabled_scores_then_flags() {
        let mut set = TaskSet::new("s", "S");
        set.create_tasks(vec![TaskDraft::new("Big"), TaskDraft::new("Tiny")])
            .unwrap();
        let scorer = TableScorer(HashMap::from([("Big", 6)]));
        let gate = ComplexityGate::new(
            &scorer,
            &OutlineDecomposer,
            GateSettings::new(5, false),
        );
        let report = gate.run(&mut set).unwrap();
        assert_eq!(report.outcome, DecompositionOutcome::SplittingDisabled);
        assert_eq!(report.flagged, vec!["T-001".to_string()]);
        assert!(report.splits.is_empty());
        assert_eq!(set.get("T-002").unwrap().complexity, Some(2));
    }

    #[test]
    fn only_pending_tasks_are_split() {
        let mut set = TaskSet::new("s", "S");
        set.create_tasks(vec![TaskDraft::new("Running").with_complexity(3)])
            .unwrap();
        set.update_status("T-001", TaskStatus::InProgress).unwrap();
        set.set_complexity("T-001", 8).unwrap();
        let scorer = TableScorer(HashMap::new());
        let gate = ComplexityGate::new(&scorer, &Stubborn, GateSettings::default());
        let report = gate.run(&mut set).unwrap();
        assert!(report.splits.is_empty());
        assert_eq!(report.flagged, vec!["T-001".to_string()]);
        assert_eq!(set.get("T-001").unwrap().status, TaskStatus::InProgress);
    }

    #[test]
    fn heuristic_scores_simple_and_compound_titles() {
        let scorer = HeuristicScorer;
        let simple = Task::new("T-001", "Rename config field");
        assert_eq!(scorer.score(&simple), thresholds::BASE_SCORE);

        let mut compound = Task::new(
            "T-002",
            "Implement login and fix session storage and update various handlers",
        );
        compound.description = Some("maybe also the admin pages".into());
        let breakdown = scorer.breakdown(&compound);
        assert!(breakdown.score > COMPLEXITY_CEILING);
        assert!(breakdown.reasons.iter().any(|r| r.contains("joins concerns")));
    }

    #[test]
    fn heuristic_counts_checklist_size() {
        let mut task = Task::new("T-001", "Ship release");
        task.subtasks = (0..6).map(|i| Subtask::new(format!("step {i}"))).collect();
        assert_eq!(HeuristicScorer.score(&task), thresholds::BASE_SCORE + 2);
    }

    #[test]
    fn outline_decomposer_halves_checklist() {
        let mut task = Task::new("T-001", "Onboarding");
        task.phase = crate::types::Phase::Setup;
        task.subtasks = ["a", "b", "c"].into_iter().map(Subtask::new).collect();
        let children = OutlineDecomposer.decompose(&task);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].title, "Onboarding (1/2)");
        assert_eq!(children[0].subtasks.len(), 2);
        assert_eq!(children[1].title, "c");
        assert!(children.iter().all(|c| c.phase == crate::types::Phase::Setup));
    }

    #[test]
    fn outline_decomposer_gives_up_on_short_checklists() {
        let mut task = Task::new("T-001", "Atomic");
        assert!(OutlineDecomposer.decompose(&task).is_empty());
        task.subtasks.push(Subtask::new("one"));
        assert!(OutlineDecomposer.decompose(&task).is_empty());
    }

    #[test]
    fn split_task_by_hand_scores_children() {
        let mut set = TaskSet::new("s", "S");
        let mut draft = TaskDraft::new("Migrate").with_subtasks(["schema", "data"]);
        draft.complexity = Some(6);
        set.create_tasks(vec![draft]).unwrap();
        let gate = ComplexityGate::new(&HeuristicScorer, &OutlineDecomposer, GateSettings::default());
        let children = gate.split_task(&mut set, "T-001").unwrap();
        assert_eq!(children, vec!["T-002", "T-003"]);
        assert!(children
            .iter()
            .all(|c| set.get(c).unwrap().complexity == Some(thresholds::BASE_SCORE)));
        assert!(gate.split_task(&mut set, "T-002").is_err());
    }
}
