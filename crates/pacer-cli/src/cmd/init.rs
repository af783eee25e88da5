use anyhow::Context;
use pacer_core::{paths, GovernorConfig};
use std::path::Path;

pub fn run(root: &Path, force: bool) -> anyhow::Result<()> {
    println!("Initializing pacer in: {}", root.display());

    let dir = paths::pacer_dir(root);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let config = GovernorConfig::default();
    let created = if force {
        config.save(root).map(|_| true)
    } else {
        config.save_if_missing(root)
    }
    .context("failed to write config.yaml")?;
    if created {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    // Opening creates the store and its tables, and validates the config.
    let existed = paths::db_path(root).exists();
    super::open_governor(root)?;
    if existed {
        println!("  exists:  {}", paths::DB_FILE);
    } else {
        println!("  created: {}", paths::DB_FILE);
    }

    Ok(())
}
