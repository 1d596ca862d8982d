use crate::output::{print_json, print_table};
use crate::shell::{self, ShellResult};
use anyhow::Context;
use std::path::Path;
use std::time::Duration;
use taskmaster_core::config::QualityGatesConfig;
use taskmaster_core::task::QualityGate;
use taskmaster_core::types::{GateOutcome, TaskStatus};
use taskmaster_core::TaskError;

/// Environment handed to every command run on behalf of a task.
pub fn task_env(root: &Path, set: &str, task: &str) -> Vec<(&'static str, String)> {
    vec![
        ("TASKMASTER_TASK_ID", task.to_string()),
        ("TASKMASTER_TASK_SET", set.to_string()),
        ("TASKMASTER_ROOT", root.display().to_string()),
    ]
}

/// Run every configured check. Unconfigured checks stay `None`.
pub fn run_configured(
    root: &Path,
    cfg: &QualityGatesConfig,
    env: &[(&str, String)],
) -> anyhow::Result<(QualityGate, Vec<ShellResult>)> {
    let timeout = Some(Duration::from_secs(cfg.timeout_seconds));
    let mut gate = QualityGate::default();
    let mut results = Vec::new();
    for (name, command) in cfg.commands() {
        let result = shell::run(name, command, root, env, timeout)
            .with_context(|| format!("failed to run {name} check"))?;
        let outcome = if result.passed {
            GateOutcome::Pass
        } else {
            GateOutcome::Fail
        };
        match name {
            "lint" => gate.lint = Some(outcome),
            "typecheck" => gate.typecheck = Some(outcome),
            _ => gate.tests = Some(outcome),
        }
        tracing::debug!(check = %name, passed = result.passed, ms = result.duration_ms, "quality check");
        results.push(result);
    }
    Ok((gate, results))
}

/// `run-gates <id>`: run the configured checks and record them on the task.
pub fn run(root: &Path, set: Option<&str>, id: &str, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let cfg = store.config().context("failed to load config")?;
    if cfg.quality_gates.commands().is_empty() {
        anyhow::bail!("no quality gates configured; set quality_gates.lint/typecheck/tests in .taskmaster/config.yaml");
    }

    let task = store.load(&slug)?.get(id)?.clone();
    if task.status != TaskStatus::InProgress {
        let err = TaskError::InvalidTransition {
            id: id.to_string(),
            from: task.status.to_string(),
            to: TaskStatus::Completed.to_string(),
        };
        return Err(anyhow::Error::new(err).context("quality gates run only for tasks in progress"));
    }

    let env = task_env(root, &slug, id);
    let (gate, results) = run_configured(root, &cfg.quality_gates, &env)?;
    let merged = store
        .update(&slug, |set| set.record_quality_gate(id, gate))
        .with_context(|| format!("failed to record quality gate for {id}"))?;

    if json {
        print_json(&serde_json::json!({
            "set": slug,
            "task": id,
            "results": results,
            "qualityGate": merged,
        }))?;
    } else {
        let rows = results
            .iter()
            .map(|r| {
                let status = if r.passed { "pass" } else { "FAIL" };
                let last = r.output.lines().last().unwrap_or("").to_string();
                vec![
                    r.name.clone(),
                    status.to_string(),
                    format!("{}ms", r.duration_ms),
                    last,
                ]
            })
            .collect();
        print_table(&["CHECK", "RESULT", "TIME", "OUTPUT"], rows);
    }

    if merged.has_failure() {
        return Err(TaskError::QualityGateFailed {
            id: id.to_string(),
            failed: merged.failed_checks(),
        }
        .into());
    }
    Ok(())
}
