use crate::core::config::AppConfig;
use crate::gateway::app_router;
use crate::subscription::RateFeed;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub async fn run(config: &AppConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    serve(listener, config, shutdown_signal()).await
}

/// Serves the gateway on `listener` until `shutdown` resolves. The default
/// base currency stays subscribed so the scheduler keeps it fresh.
pub async fn serve<F>(listener: TcpListener, config: &AppConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let feed = RateFeed::from_config(config)?;
    let _subscription = feed.subscribe(&config.base_currency);
    let router = app_router(Arc::clone(feed.service()));

    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
