use anyhow::Context;
use std::path::Path;
use taskmaster_core::{paths, store::Store};

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing taskmaster in: {}", root.display());

    let had_config = paths::config_path(root).exists();
    let had_index = paths::index_path(root).exists();
    Store::init(root).context("failed to create .taskmaster/")?;

    for (file, existed) in [
        (paths::CONFIG_FILE, had_config),
        (paths::INDEX_FILE, had_index),
    ] {
        if existed {
            println!("  exists:  {file}");
        } else {
            println!("  created: {file}");
        }
    }
    println!("\ntaskmaster initialized. Next: taskmaster create-tasks --file <tasks.json>");
    Ok(())
}
