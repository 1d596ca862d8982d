use crate::output::{or_dash, print_json};
use anyhow::Context;
use std::path::Path;
use taskmaster_core::scheduler::Selection;
use taskmaster_core::types::Strategy;

pub fn run(
    root: &Path,
    set: Option<&str>,
    strategy: Option<Strategy>,
    json: bool,
) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let mut scheduler = store.config().context("failed to load config")?.scheduler();
    if let Some(s) = strategy {
        scheduler = scheduler.with_strategy(s);
    }
    let set = super::load_validated(&store, &slug)?;
    let selection = scheduler.next(&set);

    if json {
        print_json(&serde_json::json!({
            "set": slug,
            "strategy": scheduler.strategy,
            "selection": selection,
        }))?;
        return Ok(());
    }

    match selection {
        Selection::Ready { task, candidates } => {
            println!("Next ({}): [{}] {}", scheduler.strategy, task.id, task.title);
            println!(
                "  phase {}, complexity {}",
                task.phase,
                or_dash(task.complexity)
            );
            if candidates.len() > 1 {
                println!("  also available: {}", candidates[1..].join(", "));
            }
            println!("\n  taskmaster start-task {}", task.id);
        }
        Selection::AwaitingConfirmation { boundary } => {
            println!(
                "Phase {} is complete. Run 'taskmaster confirm-phase' to start {}.",
                boundary.from, boundary.to
            );
        }
        Selection::Idle => {
            let summary = set.summary();
            println!("No task is available right now ({}).", summary.line());
            if summary.flagged > 0 {
                println!("  {} task(s) need a manual split; see 'taskmaster list-tasks'", summary.flagged);
            }
        }
        Selection::Finished => println!("All tasks in {slug} are done."),
    }
    Ok(())
}
