pub mod autoloop;
pub mod config;
pub mod gates;
pub mod graph;
pub mod init;
pub mod next;
pub mod sets;
pub mod tasks;

use anyhow::Context;
use clap::ValueEnum;
use std::path::Path;
use taskmaster_core::graph as task_graph;
use taskmaster_core::paths;
use taskmaster_core::store::Store;
use taskmaster_core::taskset::TaskSet;
use taskmaster_core::types::{GateOutcome, Strategy};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// Lowest complexity first
    QuickWin,
    /// Most transitively unblocked work first
    CriticalPath,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::QuickWin => Strategy::QuickWin,
            StrategyArg::CriticalPath => Strategy::CriticalPath,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GateArg {
    Pass,
    Fail,
}

impl From<GateArg> for GateOutcome {
    fn from(arg: GateArg) -> Self {
        match arg {
            GateArg::Pass => GateOutcome::Pass,
            GateArg::Fail => GateOutcome::Fail,
        }
    }
}

pub fn open_store(root: &Path) -> anyhow::Result<Store> {
    Store::open(root).with_context(|| format!("cannot open task store at {}", root.display()))
}

/// The set a command operates on: `--set`, or the only set on disk.
pub fn resolve_set(store: &Store, explicit: Option<&str>) -> anyhow::Result<String> {
    if let Some(slug) = explicit {
        paths::validate_slug(slug)?;
        return Ok(slug.to_string());
    }
    let index = store.index().context("failed to read index.json")?;
    match index.sets.as_slice() {
        [only] => Ok(only.id.clone()),
        [] => anyhow::bail!("no task sets yet; run 'taskmaster create-tasks --file <tasks.json>'"),
        many => {
            let ids: Vec<&str> = many.iter().map(|e| e.id.as_str()).collect();
            anyhow::bail!(
                "several task sets exist ({}); pick one with --set",
                ids.join(", ")
            )
        }
    }
}

/// Load a set and refuse to schedule from it unless its graph is sound.
///
/// Validation runs on a copy; inverse-edge repairs are persisted only by
/// mutating commands.
pub fn load_validated(store: &Store, slug: &str) -> anyhow::Result<TaskSet> {
    let mut set = store
        .load(slug)
        .with_context(|| format!("failed to load task set '{slug}'"))?;
    task_graph::validate(&mut set)
        .with_context(|| format!("task set '{slug}' failed validation"))?;
    Ok(set)
}
