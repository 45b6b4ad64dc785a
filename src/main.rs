use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use sifra::api;
use sifra::config::Config;
use sifra::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Codebase: {}", config.codebase_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/api/health", get(api::health::health))
        .route("/api/investigations", post(api::investigate::investigate))
        .route("/api/index/code", post(api::index::refresh_code))
        .route("/api/index/docs", post(api::index::refresh_docs))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    tracing::info!("Indices flushed, exiting");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
