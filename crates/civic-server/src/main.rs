//! # civic-server
//!
//! Backend for campaign group chat.
//!
//! This binary provides:
//! - **Phone + OTP sign-in** issuing signed 7-day session tokens
//! - **Group chat** for candidates and their volunteers, persisted in SQLite
//! - **Realtime gateway** over WebSocket with per-group rooms
//! - **REST API** (axum) for auth, groups, history and administration
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod chat;
mod config;
mod delivery;
mod error;
mod extract;
mod gateway;
mod rate_limit;
mod rooms;
mod sessions;
mod state;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use civic_store::Database;

use crate::config::ServerConfig;
use crate::delivery::LogSender;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,civic_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", civic_shared::constants::APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    if config.uses_dev_secret() {
        warn!("JWT_SECRET is not set; using the development secret");
    }
    if config.expose_otp {
        warn!("EXPOSE_OTP is on; one-time codes are returned in API responses");
    }

    // -----------------------------------------------------------------------
    // 3. Open the database and build shared state
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let resolved = db.path().unwrap_or_else(|| config.database_path.clone());
    info!(path = %resolved.display(), "Database ready");

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config, Arc::new(LogSender));

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Evict per-IP buckets idle for 10 minutes and per-phone buckets idle
    // for longer than their window.
    let rl = app_state.rate_limiter.clone();
    let phones = app_state.auth.phone_limiter().clone();
    let phone_idle = Duration::from_secs(app_state.config.otp_phone_window_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(Duration::from_secs(600)).await;
            phones.purge_stale(phone_idle).await;
        }
    });

    // Drop revocations for tokens that have expired anyway.
    let sessions = app_state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            sessions.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
