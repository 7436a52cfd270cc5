use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portal_core::portal::Portal;
use portal_core::queue::ChannelQueue;
use portal_core::registry::Registry;
use portal_core::results::WorkDir;
use portal_core::runtime::Worker;
use portal_core::store::SqliteStore;
use portal_gateway::{config::GatewayConfig, router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Portal Gateway Initializing...");
    let config = GatewayConfig::from_env()?;

    // 2. Open the store
    let store = Arc::new(
        SqliteStore::new(&config.database_url)
            .await
            .context("Failed to open database")?,
    );
    store.run_migrations().await.context("Failed to migrate database")?;

    // 3. Load The Registry (API definitions and users)
    info!("Loading registry from {}...", config.registry_path.display());
    let registry = Registry::load(&config.registry_path).await?;
    registry.sync(store.as_ref()).await?;

    // 4. Start the worker behind the job queue
    tokio::fs::create_dir_all(&config.working_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.working_dir.display()))?;
    let workdir = WorkDir::new(&config.working_dir);
    let (queue, jobs) = ChannelQueue::new(config.queue_capacity);
    let worker = Worker::new(store.clone(), workdir.clone());
    tokio::spawn(worker.run(jobs));

    // 5. Bundle State
    let portal = Portal::new(store, Arc::new(queue), workdir, config.local_time_zone);
    let state = AppState::new(portal, config.jwt_secret.as_bytes());

    // 6. Start Server
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Gateway listening on {}...", config.listen_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
