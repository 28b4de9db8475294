//! ButtonBox server entry point.
//!
//! Wires together the engine and its production backends, then blocks until
//! Ctrl-C.
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML from the platform config dir
//!  └─ Engine::new()
//!       ├─ LogOnlyExecutor   -- command execution backend
//!       └─ MdnsSdBackend     -- mDNS advertisement backend
//!  └─ engine.start()
//!  └─ status event pump      -- engine events -> log lines
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use buttonbox_server::application::track_sessions::SessionEvent;
use buttonbox_server::infrastructure::input::LogOnlyExecutor;
use buttonbox_server::infrastructure::network::advertiser::MdnsSdBackend;
use buttonbox_server::infrastructure::storage::config;
use buttonbox_server::{Engine, EngineEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("falling back to default config: {e}");
            Default::default()
        }
    };

    // Structured logging.  `RUST_LOG` overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(app_config.server.log_level.clone())),
        )
        .init();

    info!("ButtonBox server starting");

    let (mut engine, mut events) = Engine::new(
        app_config,
        Arc::new(LogOnlyExecutor::new()),
        Box::new(MdnsSdBackend::new()),
    );

    // ── Status event pump ─────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.body {
                EngineEvent::StateChanged { from, to } => {
                    info!("engine: {from:?} -> {to:?}");
                }
                EngineEvent::Session(SessionEvent::Connected { client_id }) => {
                    info!("client connected: {client_id}");
                }
                EngineEvent::Session(SessionEvent::Revived { client_id }) => {
                    info!("client back: {client_id}");
                }
                EngineEvent::Session(SessionEvent::WentStale { client_id }) => {
                    warn!("client quiet: {client_id}");
                }
                EngineEvent::Session(SessionEvent::Expired { client_id }) => {
                    info!("client session expired: {client_id}");
                }
                EngineEvent::MalformedPacket { src, reason } => {
                    warn!("dropped malformed packet from {src}: {reason}");
                }
                EngineEvent::CommandDropped {
                    client_id,
                    sequence,
                } => {
                    warn!("dropped command {sequence} from {client_id}: queue full");
                }
                EngineEvent::ExecutionFailed {
                    client_id,
                    sequence,
                    kind,
                    error,
                } => {
                    error!("command {kind} #{sequence} from {client_id} failed: {error}");
                }
                EngineEvent::AdvertiserChanged { state } => {
                    info!("mDNS advertisement: {state:?}");
                }
                EngineEvent::TransportFault { detail } => {
                    error!("listener fault: {detail}");
                }
            }
        }
    });

    if let Err(e) = engine.start().await {
        error!("failed to start: {e}");
        return Err(e.into());
    }

    info!("ButtonBox server ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    engine.stop().await;
    info!("ButtonBox server stopped");
    Ok(())
}
