//! `podflow-server`: loads configuration from the environment and serves the
//! pipeline endpoint until interrupted.

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use podflow::config::PodflowConfig;
use podflow::observability::init_tracing;
use podflow::pipeline::PipelineOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PodflowConfig::from_env().context("error loading configuration")?;
    init_tracing(&config.logging());
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    let orchestrator = Arc::new(PipelineOrchestrator::from_config(Arc::clone(&config)).context("error building pipeline")?);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("error binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, output_root = %config.output_root.display(), "podflow server listening");

    let shutdown = {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            shutdown_signal().await;
            let cancelled = orchestrator.shutdown();
            info!(cancelled, "Shutdown requested, draining open streams");
        }
    };
    podflow::server::serve(listener, orchestrator, shutdown)
        .await
        .context("server error")?;
    info!("podflow server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "error installing shutdown signal handler");
        std::future::pending::<()>().await;
    }
}
