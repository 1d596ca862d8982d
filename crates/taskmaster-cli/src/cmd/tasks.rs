use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use taskmaster_core::complexity::{
    ComplexityGate, DecompositionReport, HeuristicScorer, OutlineDecomposer,
};
use taskmaster_core::paths;
use taskmaster_core::task::{QualityGate, Task, TaskDraft};
use taskmaster_core::taskset::TaskSet;
use taskmaster_core::types::TaskStatus;

// ---------------------------------------------------------------------------
// create-tasks
// ---------------------------------------------------------------------------

/// `--file` accepts a bare list of drafts or a set header with a task list.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Drafts(Vec<TaskDraft>),
    Set {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
        tasks: Vec<TaskDraft>,
    },
}

pub fn create(
    root: &Path,
    set: Option<&str>,
    file: &Path,
    title: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: TaskFile = serde_json::from_str(&data)
        .with_context(|| format!("{} is not a task list", file.display()))?;
    let (file_title, description, drafts) = match parsed {
        TaskFile::Drafts(tasks) => (None, None, tasks),
        TaskFile::Set {
            title,
            description,
            tasks,
        } => (title, description, tasks),
    };
    if drafts.is_empty() {
        anyhow::bail!("{} contains no tasks", file.display());
    }

    let title = title.map(str::to_string).or(file_title);
    let slug = match (set, &title) {
        (Some(s), _) => {
            paths::validate_slug(s)?;
            s.to_string()
        }
        (None, Some(t)) => paths::slugify(t),
        (None, None) => super::resolve_set(&store, None)
            .context("name the task set with --set or --title")?,
    };

    let settings = store.config().context("failed to load config")?.gate_settings();
    let add = |set: &mut TaskSet| -> taskmaster_core::Result<(Vec<String>, DecompositionReport)> {
        if set.description.is_none() {
            set.description = description;
        }
        let created = set.create_tasks(drafts)?;
        let gate = ComplexityGate::new(&HeuristicScorer, &OutlineDecomposer, settings);
        let report = gate.run(set)?;
        Ok((created, report))
    };
    let (created, report) = if store.exists(&slug) {
        store.update(&slug, add)
    } else {
        store.create_set_with(&slug, title.as_deref().unwrap_or(&slug), add)
    }
    .with_context(|| format!("failed to add tasks to '{slug}'"))?;

    if json {
        print_json(&serde_json::json!({
            "set": slug,
            "created": created,
            "decomposition": report,
        }))?;
    } else {
        println!("Added {} task(s) to {slug}: {}", created.len(), created.join(", "));
        print_decomposition(&report);
    }
    Ok(())
}

fn print_decomposition(report: &DecompositionReport) {
    for pass in &report.passes {
        println!(
            "  pass {} ({:?}): split {}, scored {}, above ceiling {}",
            pass.number, pass.kind, pass.split, pass.scored, pass.above_ceiling
        );
    }
    for split in &report.splits {
        println!("  split {} -> {}", split.parent, split.children.join(", "));
    }
    if !report.flagged.is_empty() {
        println!(
            "  flagged for manual split: {}",
            report.flagged.join(", ")
        );
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

pub fn start(root: &Path, set: Option<&str>, id: &str, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let scheduler = store.config().context("failed to load config")?.scheduler();
    let task = store
        .update(&slug, |set| scheduler.start(set, id))
        .with_context(|| format!("cannot start {id}"))?;

    if json {
        print_json(&serde_json::json!({ "set": slug, "task": task }))?;
    } else {
        println!("Started [{}] {}", task.id, task.title);
    }
    Ok(())
}

pub fn complete(
    root: &Path,
    set: Option<&str>,
    id: &str,
    gate: QualityGate,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let scheduler = store.config().context("failed to load config")?.scheduler();

    // Record the checks on their own so a failing gate is kept on disk.
    if gate != QualityGate::default() {
        store
            .update(&slug, |set| {
                if set.get(id)?.status == TaskStatus::InProgress {
                    set.record_quality_gate(id, gate)?;
                }
                Ok(())
            })
            .with_context(|| format!("failed to record quality gate for {id}"))?;
    }
    let done = store
        .update(&slug, |set| scheduler.complete(set, id, QualityGate::default()))
        .with_context(|| format!("cannot complete {id}"))?;

    if json {
        print_json(&serde_json::json!({ "set": slug, "completion": done }))?;
    } else {
        println!("Completed [{}] {}", done.task.id, done.task.title);
        if !done.unblocked.is_empty() {
            println!("  unblocked: {}", done.unblocked.join(", "));
        }
        if let Some(b) = done.boundary {
            println!(
                "  phase {} is done; run 'taskmaster confirm-phase' to move on to {}",
                b.from, b.to
            );
        }
    }
    Ok(())
}

pub fn hold(
    root: &Path,
    set: Option<&str>,
    id: &str,
    reason: &str,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let scheduler = store.config().context("failed to load config")?.scheduler();
    let task = store
        .update(&slug, |set| scheduler.hold(set, id, reason))
        .with_context(|| format!("cannot hold {id}"))?;
    print_transition(&slug, &task, json)
}

pub fn release(root: &Path, set: Option<&str>, id: &str, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let scheduler = store.config().context("failed to load config")?.scheduler();
    let task = store
        .update(&slug, |set| scheduler.release(set, id))
        .with_context(|| format!("cannot release {id}"))?;
    print_transition(&slug, &task, json)
}

pub fn cancel(root: &Path, set: Option<&str>, id: &str, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let scheduler = store.config().context("failed to load config")?.scheduler();
    let task = store
        .update(&slug, |set| scheduler.cancel(set, id))
        .with_context(|| format!("cannot cancel {id}"))?;
    print_transition(&slug, &task, json)
}

fn print_transition(slug: &str, task: &Task, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&serde_json::json!({ "set": slug, "task": task }))?;
    } else {
        match &task.blocker {
            Some(reason) if task.status == TaskStatus::Blocked => {
                println!("[{}] is now blocked: {reason}", task.id)
            }
            _ => println!("[{}] is now {}", task.id, task.status),
        }
    }
    Ok(())
}

pub fn confirm_phase(root: &Path, set: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let scheduler = store.config().context("failed to load config")?.scheduler();
    let confirmed = store.update(&slug, |set| Ok(scheduler.confirm_phase(set)))?;

    if json {
        print_json(&serde_json::json!({ "set": slug, "confirmed": confirmed }))?;
    } else {
        match confirmed {
            Some(b) => println!("Confirmed: {} -> {}", b.from, b.to),
            None => println!("No phase boundary pending for {slug}."),
        }
    }
    Ok(())
}

/// `check-subtask <id> <item>`: `item` counts from 1, as `show-task` lists them.
pub fn check_subtask(
    root: &Path,
    set: Option<&str>,
    id: &str,
    item: u32,
    completed: bool,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let index = item.saturating_sub(1) as usize;
    let task = store
        .update(&slug, |set| {
            set.set_subtask(id, index, completed)?;
            set.get(id).cloned()
        })
        .with_context(|| format!("cannot update the checklist of {id}"))?;

    if json {
        print_json(&serde_json::json!({ "set": slug, "task": task }))?;
    } else {
        let done = task.subtasks.iter().filter(|s| s.completed).count();
        let mark = if completed { "x" } else { " " };
        println!("[{mark}] {item}. {}", task.subtasks[index].title);
        println!("[{}] {done}/{} checklist items done", task.id, task.subtasks.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

pub fn split(root: &Path, set: Option<&str>, id: &str, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let settings = store.config().context("failed to load config")?.gate_settings();
    let gate = ComplexityGate::new(&HeuristicScorer, &OutlineDecomposer, settings);
    let children = store
        .update(&slug, |set| gate.split_task(set, id))
        .with_context(|| format!("cannot split {id}"))?;
    let updated = store.load(&slug)?;

    if json {
        let tasks: Vec<&Task> = children
            .iter()
            .filter_map(|c| updated.get(c).ok())
            .collect();
        print_json(&serde_json::json!({ "set": slug, "parent": id, "children": tasks }))?;
    } else {
        println!("Split {id} into {}", children.join(", "));
        let rows = children
            .iter()
            .filter_map(|c| updated.get(c).ok())
            .map(task_row)
            .collect();
        print_table(TASK_HEADERS, rows);
    }
    Ok(())
}

pub fn score(
    root: &Path,
    set: Option<&str>,
    id: &str,
    value: Option<u8>,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let settings = store.config().context("failed to load config")?.gate_settings();
    let gate = ComplexityGate::new(&HeuristicScorer, &OutlineDecomposer, settings);
    let task = store
        .update(&slug, |set| {
            match value {
                Some(n) => set.set_complexity(id, n)?,
                None => {
                    gate.rescore(set, id)?;
                }
            }
            Ok(set.get(id)?.clone())
        })
        .with_context(|| format!("cannot score {id}"))?;

    if json {
        print_json(&serde_json::json!({ "set": slug, "task": task }))?;
    } else {
        println!(
            "[{}] complexity {}{}",
            task.id,
            or_dash(task.complexity),
            if task.exceeds_ceiling() {
                " (above ceiling; split it before starting)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

const TASK_HEADERS: &[&str] = &["ID", "STATUS", "PHASE", "CX", "BLOCKED BY", "TITLE"];

fn task_row(t: &Task) -> Vec<String> {
    let deps = if t.blocked_by.is_empty() {
        "-".to_string()
    } else {
        t.blocked_by.iter().cloned().collect::<Vec<_>>().join(",")
    };
    let cx = match t.complexity {
        Some(c) if t.split_required => format!("{c}!"),
        other => or_dash(other),
    };
    vec![
        t.id.clone(),
        t.status.to_string(),
        t.phase.to_string(),
        cx,
        deps,
        t.title.clone(),
    ]
}

pub fn list(root: &Path, set: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let set = store
        .load(&slug)
        .with_context(|| format!("failed to load task set '{slug}'"))?;

    if json {
        print_json(&serde_json::json!({
            "set": set.slug,
            "summary": set.summary(),
            "phaseBoundary": set.phase_boundary(),
            "tasks": set.tasks(),
        }))?;
        return Ok(());
    }
    if set.is_empty() {
        println!("No tasks in {slug}.");
        return Ok(());
    }
    print_table(TASK_HEADERS, set.tasks().iter().map(task_row).collect());
    println!("\n{}", set.summary().line());
    if let Some(b) = set.phase_boundary() {
        println!("Waiting at phase boundary {} -> {}", b.from, b.to);
    }
    Ok(())
}

pub fn show(root: &Path, set: Option<&str>, id: &str, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let set = store
        .load(&slug)
        .with_context(|| format!("failed to load task set '{slug}'"))?;
    let task = set.get(id)?;

    if json {
        print_json(task)?;
        return Ok(());
    }
    println!("[{}] {}", task.id, task.title);
    println!("  status:     {}", task.status);
    println!("  phase:      {}", task.phase);
    println!("  complexity: {}", or_dash(task.complexity));
    if task.split_required {
        println!("  split required before this task can be scheduled");
    }
    if let Some(desc) = &task.description {
        println!("  description: {desc}");
    }
    if !task.blocked_by.is_empty() {
        let deps: Vec<&str> = task.blocked_by.iter().map(String::as_str).collect();
        println!("  blocked by: {}", deps.join(", "));
    }
    if !task.blocks.is_empty() {
        let deps: Vec<&str> = task.blocks.iter().map(String::as_str).collect();
        println!("  blocks:     {}", deps.join(", "));
    }
    if let Some(reason) = &task.blocker {
        println!("  blocker:    {reason}");
    }
    for (name, outcome) in task.quality_gate.checks() {
        println!("  {name:<10}  {}", or_dash(outcome));
    }
    for (i, item) in task.subtasks.iter().enumerate() {
        let mark = if item.completed { "x" } else { " " };
        println!("  [{mark}] {}. {}", i + 1, item.title);
    }
    Ok(())
}
