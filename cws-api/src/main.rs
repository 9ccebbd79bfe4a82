use anyhow::{Context, Result};
use cws_api::{create_app, AppState, Config};
use cws_cluster::{KubeClient, KubeConfig};
use cws_orchestrator::WorkspaceOrchestrator;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = cws_logging::init_subscriber();

    info!("Starting cws-api service...");

    let config = Config::from_env()?;
    info!(?config, "Configuration loaded");

    let kube_config = KubeConfig::from_env().context("failed to load cluster credentials")?;
    info!(api_url = %kube_config.api_url, "Using cluster API");
    let cluster = KubeClient::new(kube_config).context("failed to build cluster client")?;

    let orchestrator = WorkspaceOrchestrator::new(Arc::new(cluster), config.orchestrator_config());
    let app = create_app(AppState::new(orchestrator, &config.api_key));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("cws-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
