// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! webutil demo server
//!
//! Wires the crate's middleware and handlers into one axum service:
//!
//! - `GET /health`
//! - `GET /webmention/discover?url=...` (cached)
//! - `POST /webmention/send` with `source` and `target`
//! - `GET /log?start_time=...&key=...` request log viewer
//! - `GET /_info` instance concurrency stats
//! - `GET /.well-known/host-meta[.json|.xrds]`
//! - `POST /_tasks/cleanup` (cron only)
//! - `GET /metrics` when enabled
//!
//! ## Configuration
//!
//! Loaded from `.env` and `WEBUTIL__*` environment variables, e.g.
//!
//! - `WEBUTIL__BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `WEBUTIL__RATE_LIMIT__MAX_RATE_RPM`: Max requests per minute per client (default: 60)
//! - `WEBUTIL__CACHE__TTL_SECS`: Response cache lifetime (default: 300)
//! - `WEBUTIL__DOMAINS__FROM`, `WEBUTIL__DOMAINS__TO`: Domain canonicalization

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webutil::{
    config::{AppInfo, Config},
    handlers::{router, AppState},
    logs::{LogCapture, LogStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    let app_info = AppInfo::from_env();

    // Initialize tracing, capturing events for the log viewer too
    let log_store = Arc::new(LogStore::new(config.logs.capacity));
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with(LogCapture::new(log_store.clone()))
        .init();

    info!(
        bind_addr = %config.bind_addr,
        max_rate_rpm = config.rate_limit.max_rate_rpm,
        cache_ttl_secs = config.cache.ttl_secs,
        local_server = app_info.local_server,
        "Starting webutil server"
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, &app_info, log_store)?;

    // Spawn cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_state.cleanup().await;
        }
    });

    let app = router(state, &app_info);

    // Start server
    let addr: SocketAddr = bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
