//! # Passkey Relying Party Server
//!
//! Entry point: logging, configuration, state, background cleanup and the
//! HTTP server.

use passkey_rp::config::Config;
use passkey_rp::create_router;
use passkey_rp::state::AppState;
use tower_sessions_sqlx_store::SqliteStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired challenges are purged
const CLEANUP_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_rp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded: {:?}", config);

    let app_state = AppState::new(&config).await?;
    tracing::info!(rp_id = %config.rp_id, origin = %config.rp_origin, "Application state initialized");

    // Expiry is enforced at redemption; this only keeps the table small
    let challenges = app_state.challenges.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match challenges.purge_expired().await {
                Ok(removed) => tracing::debug!(removed, "Expired challenges purged"),
                Err(e) => tracing::error!("Challenge cleanup failed: {:?}", e),
            }
        }
    });

    // Sessions live in the same SQLite database
    let session_store = SqliteStore::new(app_state.db.clone());
    session_store.migrate().await?;

    let app = create_router(app_state, session_store, config.secure_cookies());

    let bind_addr = config.bind_address();
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
