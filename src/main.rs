use anyhow::Result;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use sponsor_guard::config::Config;
use sponsor_guard::{build_state, server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let state = build_state(&config)?;

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server.bind {:?} (expected host:port): {e}", config.server.bind))?;
    let router = server::router(state, config.server.bearer_token.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        %bind,
        chain_id = config.sponsor.chain_id,
        app_contract = %config.sponsor.app_contract,
        auth = %config.server.bearer_token.as_deref().map(|_| "bearer").unwrap_or("none"),
        "Starting sponsor-guard HTTP server"
    );

    axum::serve(listener, router).await?;
    tracing::info!("Server shutting down");
    Ok(())
}
