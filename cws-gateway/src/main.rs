use anyhow::{Context, Result};
use cws_gateway::{create_app, AppState, Config};
use cws_terminal::SessionManager;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = cws_logging::init_subscriber();

    info!("Starting cws-gateway service...");

    let config = Config::from_env();
    info!(?config, "Configuration loaded");

    let sessions = SessionManager::new(config.session_config());
    info!(shell = %sessions.config().shell, "Terminal sessions ready");
    let app = create_app(AppState::new(sessions.clone()), config.cors_layer());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    info!("cws-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
