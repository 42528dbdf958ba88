mod config;
mod store;
mod store_manager;
mod api;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::store::db::PortalDb;
use crate::store_manager::StoreHandle;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("portald=info"))
        )
        .init();

    tracing::info!("Starting portald");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/portald/portald.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = PortalDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let initial = db.list_portals()?;
    let initial_hash = store::hash::compute_hash(&initial.portals);
    tracing::info!(
        portals = initial.portals.len(),
        version = initial.version,
        "Initial listing hash: {}",
        initial_hash
    );

    let (hash_tx, hash_rx) = watch::channel(initial_hash);
    let store_handle = StoreHandle::spawn(db, hash_tx);

    let cancel = CancellationToken::new();

    let app = api::routes::router(api::routes::AppState {
        store: store_handle.clone(),
        hash_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("Control API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = server_handle.await;

    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
