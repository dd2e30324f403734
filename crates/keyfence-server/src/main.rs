//! # keyfence-server
//!
//! HTTP server for the keyfence geofenced unlock service.
//!
//! This binary provides:
//! - REST API for catalog lookup, location checks and unlock commands
//! - OpenAPI documentation via Swagger UI at `/docs`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package keyfence-server
//!
//! # With an explicit config file
//! KEYFENCE_CONFIG=./keyfence.toml ./keyfence-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;

use anyhow::Context;
use keyfence_core::Config;
use keyfence_server::api;
use keyfence_server::logging;
use keyfence_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Config::config_path()?;
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init(&config.server)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting keyfence-server"
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address))?;

    let state = AppState::from_config(config)?;
    let sweeper = state.spawn_session_sweeper();
    let app = api::create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    state.close_all().await;
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
