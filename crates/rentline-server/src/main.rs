//! # rentline-server
//!
//! Realtime support relay for the rental backend.
//!
//! This binary provides:
//! - **Chat hub** (`/hubs/chat`) relaying support messages between customers
//!   and staff, with staff assignment and conversation lifecycle
//! - **Statistics hub** (`/hubs/stats`) pushing support counters to staff
//!   dashboards on an interval and after every change
//! - **Maintenance gate** answering `/api` traffic with 503 during a declared
//!   window, except for admins and allow-listed paths
//! - **REST API** (axum) for conversations, reports, statistics and the
//!   maintenance window
//! - **Per-IP rate limiting** for HTTP and per-user limits for hub commands

mod api;
mod auth;
mod chat;
mod config;
mod error;
mod hubs;
mod maintenance;
mod rate_limit;
mod registry;
mod state;
mod stats;

use std::time::Duration;

use rentline_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rentline_server=debug")),
        )
        .init();

    info!("Starting Rentline support relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration (fails fast on missing required variables)
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env()?;
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and wire up the relays
    // -----------------------------------------------------------------------
    let db = Database::open(&config.database_url)?;
    info!(path = ?db.path(), "Database ready");

    let http_addr = config.http_addr;
    let stats_interval = config.stats_interval;
    let state = AppState::build(config, db)?;

    let window = state.maintenance.current().await;
    if window.active {
        info!(start = ?window.start, end = ?window.end, "Restored maintenance window");
    }

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let _stats_ticker = state.stats.spawn_periodic(stats_interval);

    // Rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let http_limiter = state.http_limiter.clone();
    let chat_limiter = state.chat_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let ips = http_limiter.purge_stale(600.0).await;
            let users = chat_limiter.purge_stale(600.0).await;
            if ips + users > 0 {
                tracing::debug!(ips, users, "Purged idle rate limit buckets");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
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
