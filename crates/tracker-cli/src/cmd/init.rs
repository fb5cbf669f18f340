use anyhow::Context;
use std::path::Path;
use tracker_core::config::Config;
use tracker_core::store::RedbStore;
use tracker_core::{io, paths};

pub fn run(root: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let project_name = match name {
        Some(n) => n.to_string(),
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tracker".to_string()),
    };

    println!("Initializing tracker in: {}", root.display());

    let dir = paths::tracker_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::new(&project_name)
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let db = paths::db_path(root);
    let existed = db.exists();
    RedbStore::open(&db).context("failed to create order database")?;
    if existed {
        println!("  exists:  {}", paths::DB_FILE);
    } else {
        println!("  created: {}", paths::DB_FILE);
    }

    Ok(())
}
