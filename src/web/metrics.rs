// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for the middleware.

use crate::error::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use tracing::error;

/// Middleware metrics and the registry they're exported from.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Requests currently being handled
    pub in_flight: IntGauge,
    /// Highest concurrency seen since startup
    pub peak_concurrent: IntGauge,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("in_flight", &self.in_flight.get())
            .field("peak_concurrent", &self.peak_concurrent.get())
            .field("cache_hits", &self.cache_hits.get())
            .field("cache_misses", &self.cache_misses.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("webutil".to_string()), None)?;

        let in_flight = IntGauge::new("requests_in_flight", "Requests currently being handled")?;
        let peak_concurrent =
            IntGauge::new("requests_peak_concurrent", "Highest number of concurrent requests")?;
        let cache_hits = IntCounter::new("response_cache_hits_total", "Response cache hits")?;
        let cache_misses = IntCounter::new("response_cache_misses_total", "Response cache misses")?;

        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(peak_concurrent.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;

        Ok(Self {
            registry,
            in_flight,
            peak_concurrent,
            cache_hits,
            cache_misses,
        })
    }

    /// Text exposition format of all metrics.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// `GET /metrics` handler.
pub async fn metrics(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Couldn't render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
