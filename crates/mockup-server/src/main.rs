//! # mockup-server
//!
//! HTTP backend for the mockup studio.
//!
//! This binary provides:
//! - **Streaming generation**: `POST /chat` relays model output as plain
//!   text with in-band markers, then charges credits and persists frames
//! - **Projects**: listing, creation, snapshots and frame replacement for
//!   undo/redo sync
//! - **Billing webhook** that tops up credits when a subscription starts
//! - **Per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod chat;
mod config;
mod error;
mod gemini;
mod ledger;
mod projects;
mod prompt;
mod rate_limit;
mod webhook;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use mockup_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::gemini::GeminiClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mockup_server=debug")),
        )
        .init();

    info!("Starting mockup server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; generations will fail");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let references = prompt::load_reference_designs(&config.reference_designs_dir).await;
    info!(count = references.len(), "Loaded reference designs");

    let generator = Arc::new(GeminiClient::from_config(&config)?);
    let http_addr = config.http_addr;
    let app_state = AppState::new(db, generator, references, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = app_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
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
