// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Gateway: wires the params store, backend loader, model cache,
//! dispatcher, ingest pipeline, and registry behind the HTTP surface
//! (§6).

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod ingest;
pub mod registry;
pub mod shutdown;
pub mod state;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::info;

use state::AppState;
use tfaas_config::Config;

/// Start the gateway: load the process-wide session config, build
/// application state, bind the HTTP listener, and serve until shutdown.
pub async fn run(config: Config) -> Result<()> {
    info!(port = config.port, model_dir = %config.model_dir.display(), "starting tfaas gateway");

    let session_config = match &config.session_config_path {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read session config at {}", path.display()))?,
        None => Vec::new(),
    };

    let state = AppState::new(config.model_dir.clone(), session_config, config.cache_limit);
    let app = http::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("http server failed")?;
        }
        _ = shutdown::wait_for_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
