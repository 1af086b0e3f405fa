use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tether_channels::MessageRouter;
use tether_core::TetherConfig;
use tether_engine::{ConversationEngine, Engine};
use tether_sessions::SessionRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod app;
mod http;

/// HTTP gateway in front of an OpenCode backend.
#[derive(Parser, Debug)]
#[command(name = "tether-gateway")]
#[command(version)]
struct Args {
    /// Config file. Falls back to TETHER_CONFIG, then ~/.tether/tether.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tether_gateway=info,tether_engine=info,tether_channels=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config > TETHER_CONFIG env > ~/.tether/tether.toml
    let config_path = args
        .config
        .or_else(|| std::env::var("TETHER_CONFIG").ok());
    let config = TetherConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        TetherConfig::default()
    });

    let registry = Arc::new(SessionRegistry::open(&config.sessions.path));

    let shutdown = CancellationToken::new();
    let engine = Arc::new(Engine::from_config(&config));
    engine.start(&shutdown);
    info!(backend = %config.backend.base_url, "engine started");

    let router = MessageRouter::new(
        Arc::clone(&engine) as Arc<dyn ConversationEngine>,
        registry,
        config.channels.clone(),
    );

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, router));
    let app = app::build_router(state);

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        on_signal.cancel();
    });

    info!("Tether gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let until = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { until.cancelled().await })
        .await?;

    engine.stop();
    Ok(())
}
