use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;

/// `sets`: list task sets from `index.json`, optionally rebuilding it first.
pub fn run(root: &Path, rebuild: bool, json: bool) -> anyhow::Result<()> {
    let store = super::open_store(root)?;
    let index = if rebuild {
        store.rebuild_index().context("failed to rebuild index.json")?
    } else {
        store.index().context("failed to read index.json")?
    };

    if json {
        print_json(&index)?;
        return Ok(());
    }
    if index.sets.is_empty() {
        println!("No task sets.");
        return Ok(());
    }
    let rows = index
        .sets
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.status.to_string(),
                format!("{}/{}", e.progress.completed, e.progress.total),
                e.title.clone(),
            ]
        })
        .collect();
    print_table(&["SET", "STATUS", "DONE", "TITLE"], rows);
    Ok(())
}
