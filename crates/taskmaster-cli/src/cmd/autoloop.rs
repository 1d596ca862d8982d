use super::gates;
use super::StrategyArg;
use crate::output::print_json;
use crate::shell;
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use std::time::Duration;
use taskmaster_core::autoloop::{
    AutoLoop, Begin, Executor, LoopControl, LoopOutcome, LoopReport, Step,
};
use taskmaster_core::config::Config;
use taskmaster_core::store::Store;
use taskmaster_core::task::{QualityGate, Task};
use taskmaster_core::types::Strategy;
use taskmaster_core::TaskError;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum LoopSubcommand {
    /// Register an auto-loop for the task set
    Start {
        /// Stop after this many completed tasks (default: auto_loop.max_iterations)
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Selection strategy (default: scheduler.default_strategy)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },

    /// Show the active loop, if any
    Status,

    /// Execute tasks until the loop pauses
    Run,
}

pub fn run(root: &Path, set: Option<&str>, subcmd: LoopSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        LoopSubcommand::Start {
            max_iterations,
            strategy,
        } => start(root, set, max_iterations, strategy, json),
        LoopSubcommand::Status => status(root, set, json),
        LoopSubcommand::Run => run_loop(root, set, json),
    }
}

// ---------------------------------------------------------------------------
// Shell executor
// ---------------------------------------------------------------------------

/// Runs `auto_loop.command` for a task, then the configured quality gates.
struct ShellExecutor<'a> {
    root: &'a Path,
    set: &'a str,
    config: &'a Config,
    command: String,
}

impl Executor for ShellExecutor<'_> {
    fn execute(&mut self, task: &Task) -> taskmaster_core::Result<QualityGate> {
        let failed = |message: String| TaskError::ExecutorFailed {
            id: task.id.clone(),
            message,
        };
        let env = gates::task_env(self.root, self.set, &task.id);
        let timeout = Some(Duration::from_secs(self.config.auto_loop.timeout_seconds));

        let result = shell::run("execute", &self.command, self.root, &env, timeout)
            .map_err(|e| failed(format!("{e:#}")))?;
        if !result.passed {
            let tail: Vec<&str> = result.output.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(failed(format!("command exited non-zero: {}", tail.join(" | "))));
        }

        let (gate, results) = gates::run_configured(self.root, &self.config.quality_gates, &env)
            .map_err(|e| failed(format!("{e:#}")))?;
        for r in results.iter().filter(|r| !r.passed) {
            tracing::warn!(task = %task.id, check = %r.name, "quality check failed");
        }
        Ok(gate)
    }
}

// ---------------------------------------------------------------------------
// start / status
// ---------------------------------------------------------------------------

fn start(
    root: &Path,
    set: Option<&str>,
    max_iterations: Option<u32>,
    strategy: Option<StrategyArg>,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let config = store.config().context("failed to load config")?;
    let control = LoopControl::new(
        &slug,
        strategy
            .map(Strategy::from)
            .unwrap_or(config.scheduler.default_strategy),
        max_iterations.unwrap_or(config.auto_loop.max_iterations),
    );
    store
        .begin_loop(&control)
        .with_context(|| format!("cannot start an auto-loop for '{slug}'"))?;

    if json {
        print_json(&control)?;
    } else {
        println!(
            "Auto-loop {} registered for {slug} ({}, up to {} tasks).",
            control.id, control.strategy, control.max_iterations
        );
        println!("Next: taskmaster loop run");
    }
    Ok(())
}

fn status(root: &Path, set: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let control = store.load_loop(&slug)?;

    if json {
        print_json(&serde_json::json!({
            "set": slug,
            "active": control.is_some(),
            "loop": control,
        }))?;
        return Ok(());
    }
    match control {
        None => println!("No active auto-loop for {slug}."),
        Some(c) => {
            println!("Auto-loop {} on {slug}", c.id);
            println!("  strategy:   {}", c.strategy);
            println!("  iterations: {}/{}", c.iterations, c.max_iterations);
            if let Some(current) = &c.current {
                println!("  current:    {current}");
            }
            if let Some(outcome) = &c.last_outcome {
                println!("  paused:     {}", outcome.describe());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// True while `loop.json` still describes this loop. A missing file or a
/// different id means `cancel-loop` ran.
fn still_active(store: &Store, control: &LoopControl) -> bool {
    matches!(store.load_loop(&control.set), Ok(Some(c)) if c.id == control.id)
}

fn persist(store: &Store, control: &LoopControl) -> anyhow::Result<()> {
    if still_active(store, control) {
        store
            .save_loop(control)
            .context("failed to write loop.json")?;
    }
    Ok(())
}

fn run_loop(root: &Path, set: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let control = store
        .load_loop(&slug)?
        .ok_or_else(|| TaskError::NoActiveLoop(slug.clone()))?;
    let config = store.config().context("failed to load config")?;
    let command = config
        .auto_loop
        .command
        .clone()
        .filter(|c| !c.trim().is_empty())
        .context("auto_loop.command is not set in .taskmaster/config.yaml")?;
    super::load_validated(&store, &slug)?;

    let watched = control.clone();
    let cancelled = || !still_active(&store, &watched);
    let mut auto = AutoLoop::new(control, config.scheduler.phase_gating);
    let mut executor = ShellExecutor {
        root,
        set: &slug,
        config: &config,
        command,
    };
    tracing::info!(
        set = %slug,
        id = %watched.id,
        remaining = auto.control().remaining(),
        "auto-loop running"
    );

    let mut completed = Vec::new();
    let outcome = loop {
        let begin = store.update(&slug, |set| auto.begin(set, &cancelled))?;
        let task = match begin {
            Begin::Execute(task) => task,
            Begin::Paused(outcome) => break outcome,
        };
        persist(&store, auto.control())?;

        let gate = executor
            .execute(&task)
            .with_context(|| format!("auto-loop stopped; {} is still in progress", task.id))?;
        let step = store.update(&slug, |set| auto.finish(set, &task.id, gate, &cancelled))?;
        match step {
            Step::Completed(done) => {
                if !json {
                    println!("completed [{}] {}", done.task.id, done.task.title);
                }
                completed.push(done.task.id);
                persist(&store, auto.control())?;
            }
            Step::Paused(outcome) => break outcome,
        }
    };

    let control = auto.into_control();
    match &outcome {
        LoopOutcome::MaxIterationsReached | LoopOutcome::NoAvailableTasks => {
            if still_active(&store, &control) {
                store.clear_loop(&slug)?;
            }
        }
        LoopOutcome::PhaseBoundary { .. } | LoopOutcome::QualityGateFailed { .. } => {
            persist(&store, &control)?;
        }
        LoopOutcome::Cancelled => {}
    }

    let report = LoopReport {
        completed,
        outcome,
        iterations: control.iterations,
    };
    if json {
        print_json(&report)?;
    } else {
        println!(
            "Auto-loop paused after {} task(s): {}",
            report.completed.len(),
            report.outcome.describe()
        );
        if let LoopOutcome::QualityGateFailed { task, .. } = &report.outcome {
            println!("Fix {task}, then run 'taskmaster loop run' to retry it.");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// cancel-loop
// ---------------------------------------------------------------------------

/// Delete `loop.json` only. Task state is left exactly as it is.
pub fn cancel(root: &Path, set: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    if !store.clear_loop(&slug)? {
        return Err(TaskError::NoActiveLoop(slug).into());
    }
    if json {
        print_json(&serde_json::json!({ "set": slug, "cancelled": true }))?;
    } else {
        println!("Auto-loop for {slug} cancelled; task state is unchanged.");
    }
    Ok(())
}
