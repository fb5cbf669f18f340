pub mod config;
pub mod init;
pub mod order;
pub mod serve;
pub mod tick;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracker_core::config::Config;
use tracker_core::engine::Engine;
use tracker_core::paths;
use tracker_core::store::RedbStore;

/// Load config and open the order database for a one-shot command.
pub(crate) fn open_engine(root: &Path) -> anyhow::Result<(Config, Engine)> {
    let config = Config::load(root).context("failed to load config")?;
    let db = paths::db_path(root);
    let store = RedbStore::open(&db)
        .with_context(|| format!("failed to open order database {}", db.display()))?;
    let engine = Engine::from_config(Arc::new(store), &config.auto_progress)
        .context("invalid auto_progress rules")?;
    Ok((config, engine))
}
