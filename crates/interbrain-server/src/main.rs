//! # interbrain-server
//!
//! Local coordination daemon for an InterBrain vault.
//!
//! This binary provides:
//! - **REST API** (axum) over the trust graph, dependency composer,
//!   collaboration memory and sync orchestrator
//! - **Background sync previews** that fetch every collaborator fork on a
//!   fixed interval and record a run summary per node
//!
//! Repository operations go through the `git` and `rad` executables.

mod api;
mod config;
mod error;

use std::sync::Arc;

use interbrain_core::Coordinator;
use interbrain_shared::Identity;
use interbrain_store::Database;
use interbrain_vcs::{GitCli, RadCli};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,interbrain_server=debug,interbrain_core=debug")),
        )
        .init();

    info!("Starting InterBrain daemon v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        vault = %config.vault_path.display(),
        http_addr = %config.http_addr,
        sync_interval_secs = config.sync_interval.as_secs(),
        max_parallel_fetches = config.max_parallel_fetches,
        auth_enabled = config.api_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    tokio::fs::create_dir_all(&config.vault_path).await?;

    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let identity = Identity::load_or_generate(&config.identity_path)?;
    info!(peer = %identity.peer_id(), "Loaded signing identity");

    let coordinator = Coordinator::new(
        config.vault_path.clone(),
        database,
        Arc::new(GitCli::new(config.git_bin.clone())),
        Arc::new(RadCli::new(config.rad_bin.clone())),
        config.sync_config(),
    );

    // Share links name the network peer and carry the daemon's signature.
    match coordinator.vault().gateway().network().local_peer().await {
        Ok(peer) => info!(peer = %peer, signer = %identity.peer_id(), "Network identity"),
        Err(e) => warn!(error = %e, "Network identity unavailable; sharing will fail until the node is up"),
    }

    let app_state = AppState {
        coordinator: coordinator.clone(),
        identity: Arc::new(identity),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    if !config.sync_interval.is_zero() {
        let period = config.sync_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match coordinator.preview_all().await {
                    Ok(previews) => {
                        let pending: usize = previews.iter().map(|p| p.candidate_count()).sum();
                        info!(nodes = previews.len(), pending, "Background sync preview finished");
                    }
                    Err(e) => warn!(error = %e, "Background sync preview failed"),
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
