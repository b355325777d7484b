use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nexus_arena_server::config::ServerConfig;
use nexus_arena_server::game::game_loop::GameLoop;
use nexus_arena_server::game::modes;
use nexus_arena_server::metrics::Metrics;
use nexus_arena_server::net::game_session::{self, GameSession};
use nexus_arena_server::net::transport::{self, TcpServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Nexus Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().context("Invalid configuration")?;
    info!(
        "Configuration loaded: {}:{}, {} Hz, gamemode={}, max_connections={}",
        config.bind_address, config.port, config.tick_rate, config.gamemode, config.max_connections
    );

    let metrics = Arc::new(Metrics::new());

    // Store, arena, then gamemode setup; connections come last
    let gamemode = modes::by_name(&config.gamemode)
        .with_context(|| format!("Unknown gamemode '{}'", config.gamemode))?;
    let game_loop = GameLoop::new(config.game_loop(), gamemode).context("Failed to build the world")?;

    let writers = transport::writers();
    let server = Arc::new(TcpServer::new(
        config.clone(),
        game_loop.sender(),
        writers.clone(),
        metrics.clone(),
    ));
    let listener = server.bind().await?;
    let session = GameSession::new(game_loop, writers, metrics, config.max_message_size);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let outcome = tokio::select! {
        result = server.run(listener) => result.context("Transport failed"),
        result = game_session::run(session) => result.context("Simulation failed"),
        _ = shutdown => Ok(()),
    };

    // Dropping the transport and session closes every connection
    match &outcome {
        Ok(()) => info!("Server stopped"),
        Err(e) => error!("Server stopped: {:#}", e),
    }
    outcome
}
