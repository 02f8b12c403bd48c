use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing::info;

use llm_core::{CompletionClient, CompletionConfig};
use voice_server::config::ServerConfig;
use voice_server::routes::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice relay server...");

    let completion_config = CompletionConfig::from_env()?;
    info!(
        "Completion provider: {:?}, model={}",
        completion_config.provider, completion_config.model
    );
    let completion = Arc::new(CompletionClient::new(completion_config));

    // Load configuration from environment
    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, llm_timeout={}s",
        config.port, config.rate_limit_per_minute, config.llm_timeout_secs
    );

    let state = AppState::new(completion, config.clone());
    let app = app(state)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
