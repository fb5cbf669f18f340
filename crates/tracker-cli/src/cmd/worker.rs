use std::path::Path;
use std::sync::Arc;

use tracker_server::worker::WorkerHandle;

/// Run the auto-progress worker in the foreground until Ctrl-C.
pub fn run(root: &Path) -> anyhow::Result<()> {
    let (config, engine) = super::open_engine(root)?;
    if !config.auto_progress.enabled {
        anyhow::bail!("auto_progress is disabled in {}", tracker_core::paths::CONFIG_FILE);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let worker = WorkerHandle::spawn(Arc::new(engine), &config.auto_progress);
        println!(
            "auto-progress worker running every {}s (Ctrl-C to stop)",
            config.auto_progress.check_interval_secs
        );
        tokio::signal::ctrl_c().await?;
        worker.stop();
        Ok::<_, anyhow::Error>(())
    })
}
