// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers and router for the webutil server.
//!
//! Besides health, metrics and developer endpoints, the server exposes
//! Webmention discovery and sending over HTTP, wrapped in the crate's
//! middleware.

use crate::config::{AppInfo, Config};
use crate::error::Result;
use crate::http::{HttpClient, RequestOptions};
use crate::logs::{LogStore, LogViewer};
use crate::web::errors::HttpError;
use crate::web::{
    cached, canonical_domain, cloud_tasks_only, concurrent_requests, default_headers, instance,
    metrics, modern_headers, rate_limit, trace, CanonicalDomain, HostMeta, InstanceInfo, Metrics,
    Params, RateLimiter, ResponseCache, TaskLogging,
};
use crate::webmention;
use axum::extract::{FromRef, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: HttpClient,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub instance: Arc<InstanceInfo>,
    pub metrics: Arc<Metrics>,
    pub logs: LogViewer,
}

impl AppState {
    pub fn new(config: Config, app_info: &AppInfo, log_store: Arc<LogStore>) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let app_id = app_info.app_id.clone().unwrap_or_default();
        Ok(Self {
            client: HttpClient::new(config.http.clone())?,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            cache: Arc::new(ResponseCache::new(&config.cache).with_metrics(metrics.clone())),
            instance: Arc::new(InstanceInfo::new().with_metrics(metrics.clone())),
            logs: LogViewer::new(log_store, &app_id),
            metrics,
            config: Arc::new(config),
        })
    }

    /// Drops expired rate limiter and cache entries.
    pub async fn cleanup(&self) {
        self.limiter.cleanup();
        self.cache.cleanup();
    }
}

impl FromRef<AppState> for LogViewer {
    fn from_ref(state: &AppState) -> Self {
        state.logs.clone()
    }
}

impl FromRef<AppState> for Arc<InstanceInfo> {
    fn from_ref(state: &AppState) -> Self {
        state.instance.clone()
    }
}

impl FromRef<AppState> for Arc<Metrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "webutil",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub url: String,
    pub endpoint: Option<String>,
}

/// `GET /webmention/discover?url=...`
pub async fn discover(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<DiscoverResponse>> {
    let url = params.required("url")?;
    let found = webmention::discover(&state.client, url, true, RequestOptions::default()).await?;
    Ok(Json(DiscoverResponse {
        url: url.to_string(),
        endpoint: found.endpoint,
    }))
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub endpoint: String,
    pub status: u16,
}

/// `POST /webmention/send` with `source` and `target` params. Discovers the
/// target's endpoint and sends it a webmention.
pub async fn send(State(state): State<AppState>, params: Params) -> Result<Json<SendResponse>> {
    let source = params.required("source")?;
    let target = params.required("target")?;

    let found = webmention::discover(&state.client, target, true, RequestOptions::default()).await?;
    let Some(endpoint) = found.endpoint else {
        return Err(HttpError::bad_request(format!("No webmention endpoint found for {target}")).into());
    };

    let response =
        webmention::send(&state.client, &endpoint, source, target, RequestOptions::default())
            .await?;
    info!(endpoint, status = response.status.as_u16(), "Sent webmention");
    Ok(Json(SendResponse {
        endpoint,
        status: response.status.as_u16(),
    }))
}

/// `POST /_tasks/cleanup`, for cron.
pub async fn cleanup_task(State(state): State<AppState>) -> &'static str {
    state.cleanup().await;
    "OK"
}

/// Builds the server's router with all middleware installed.
pub fn router(state: AppState, app_info: &AppInfo) -> Router {
    let config = state.config.clone();

    let discover_routes = Router::new()
        .route("/webmention/discover", get(discover))
        .route_layer(middleware::from_fn_with_state(state.cache.clone(), cached));

    let task_routes = Router::new()
        .route("/_tasks/cleanup", post(cleanup_task))
        .route_layer(middleware::from_fn_with_state(
            TaskLogging::UnlessTraced,
            cloud_tasks_only,
        ));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/log", get(crate::logs::log))
        .route("/_info", get(instance::info))
        .route("/webmention/send", post(send))
        .merge(discover_routes)
        .merge(task_routes)
        .merge(HostMeta::new().routes());

    if config.metrics.enabled {
        app = app.route(&config.metrics.path, get(metrics::metrics));
    }

    let mut app = app
        .layer(middleware::from_fn_with_state(state.limiter.clone(), rate_limit))
        .layer(middleware::from_fn_with_state(
            state.instance.clone(),
            concurrent_requests,
        ));

    if let Some(domain) = CanonicalDomain::from_config(&config.domains) {
        app = app.layer(middleware::from_fn_with_state(Arc::new(domain), canonical_domain));
    }

    app.layer(middleware::from_fn_with_state(
        Arc::new(modern_headers(app_info.local_server)),
        default_headers,
    ))
    .layer(middleware::from_fn(trace))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
