use std::path::Path;

use anyhow::Context;
use tracker_core::config::Config;

/// Start the HTTP API (with its background worker) in the foreground.
pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let port = port.unwrap_or(config.server.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        let actual_port = listener.local_addr()?.port();
        println!("tracker '{}' → http://localhost:{actual_port}", config.project.name);
        tracker_server::serve_on(root, listener).await
    })
}
