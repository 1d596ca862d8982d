use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;
use taskmaster_core::graph::{self as task_graph, RepairKind};

pub fn show(root: &Path, set: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let set = store
        .load(&slug)
        .with_context(|| format!("failed to load task set '{slug}'"))?;
    let analysis = task_graph::analyze(&set)
        .with_context(|| format!("task set '{slug}' failed validation"))?;

    if json {
        print_json(&serde_json::json!({ "set": slug, "graph": analysis }))?;
        return Ok(());
    }

    let rows = analysis
        .levels
        .iter()
        .map(|level| {
            let detail: Vec<String> = level
                .tasks
                .iter()
                .filter_map(|id| set.get(id).ok())
                .map(|t| format!("{} [{}]", t.id, t.status))
                .collect();
            vec![level.level.to_string(), detail.join("  ")]
        })
        .collect();
    print_table(&["LEVEL", "TASKS"], rows);

    println!(
        "\ncritical path: {} (complexity {})",
        analysis.critical_path.tasks.join(" -> "),
        analysis.critical_path.complexity
    );
    println!("parallel tracks: {}", analysis.parallel_tracks.len());
    for (i, track) in analysis.parallel_tracks.iter().enumerate() {
        println!("  {}. {}", i + 1, track.join(", "));
    }
    Ok(())
}

/// Check acyclicity and references, persist inverse-edge repairs, and
/// optionally break cycles first.
pub fn validate(root: &Path, set: Option<&str>, fix_cycles: bool, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let slug = super::resolve_set(&store, set)?;
    let (removed, report) = store
        .update(&slug, |set| {
            let removed = if fix_cycles {
                task_graph::fix_cycles(set)?
            } else {
                Vec::new()
            };
            let report = task_graph::validate(set)?;
            Ok((removed, report))
        })
        .with_context(|| format!("task set '{slug}' failed validation"))?;

    if json {
        print_json(&serde_json::json!({
            "set": slug,
            "valid": true,
            "removedEdges": removed
                .iter()
                .map(|(from, to)| serde_json::json!({ "from": from, "to": to }))
                .collect::<Vec<_>>(),
            "repairs": report.repairs,
            "order": report.order,
        }))?;
        return Ok(());
    }

    for (from, to) in &removed {
        println!("removed cycle edge: {from} blocked by {to}");
    }
    for repair in &report.repairs {
        match repair.kind {
            RepairKind::AddedInverse => {
                println!("repaired: {} now lists {} as a dependent", repair.task, repair.other)
            }
            RepairKind::RemovedStale => {
                println!("repaired: {} no longer lists {} as a dependent", repair.task, repair.other)
            }
        }
    }
    println!("{slug}: graph is valid ({} tasks)", report.order.len());
    if !report.order.is_empty() {
        println!("order: {}", report.order.join(" -> "));
    }
    Ok(())
}
