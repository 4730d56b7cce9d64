// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! In-memory response cache middleware.
//!
//! Responses are keyed by method, URL and a configurable set of request
//! header values. Requests with `?cache=false` or any cookie bypass the
//! cache. Responses that set cookies aren't stored, and neither are 5xx
//! responses unless configured. At most `max_entries` responses are kept;
//! when full, expired entries go first, then the oldest.

use super::host_url;
use super::metrics::Metrics;
use crate::config::CacheConfig;
use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone)]
struct CachedResponse {
    inserted: Instant,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Shared response cache state.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
    ttl: Duration,
    max_entries: usize,
    headers: Vec<String>,
    cache_5xx: bool,
    metrics: Option<Arc<Metrics>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let mut headers: Vec<String> = config.headers.iter().map(|h| h.to_lowercase()).collect();
        headers.sort();
        Self {
            entries: DashMap::new(),
            ttl: config.ttl(),
            max_entries: config.max_entries,
            headers,
            cache_5xx: config.cache_5xx,
            metrics: None,
        }
    }

    /// Counts hits and misses in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cache key for a request.
    pub fn key(&self, method: &Method, uri: &axum::http::Uri, headers: &HeaderMap) -> String {
        let mut key = String::new();
        if method != Method::GET {
            key.push_str(method.as_str());
            key.push(' ');
        }
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let values: Vec<&str> = self
            .headers
            .iter()
            .map(|name| {
                headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
            })
            .collect();
        key.push_str(&format!(
            "{} {path}  {}",
            host_url(uri, headers),
            values.join("  ")
        ));
        key
    }

    fn get(&self, key: &str) -> Option<Response> {
        let entry = self.entries.get(key)?;
        if entry.inserted.elapsed() < self.ttl {
            return Some(entry.to_response());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    fn insert(&self, key: String, entry: CachedResponse) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.cleanup();
        }
        if self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|e| *e.key() != key)
                .min_by_key(|e| e.value().inserted)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                debug!(key = %oldest, "Cache full, evicting");
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, entry);
    }

    fn should_store(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        !headers.contains_key(header::SET_COOKIE) && (self.cache_5xx || !status.is_server_error())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops expired entries. Call periodically.
    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
    }
}

fn skip_cache(request: &Request) -> bool {
    let no_cache_param = request.uri().query().is_some_and(|query| {
        query.split('&').any(|pair| {
            pair.split_once('=')
                .is_some_and(|(name, value)| name == "cache" && value.eq_ignore_ascii_case("false"))
        })
    });
    no_cache_param || request.headers().contains_key(header::COOKIE)
}

/// Middleware that serves and stores responses in a [`ResponseCache`].
pub async fn cached(
    State(cache): State<Arc<ResponseCache>>,
    request: Request,
    next: Next,
) -> Response {
    if skip_cache(&request) {
        return next.run(request).await;
    }

    let key = cache.key(request.method(), request.uri(), request.headers());
    if let Some(response) = cache.get(&key) {
        debug!(%key, "Serving from cache");
        if let Some(metrics) = &cache.metrics {
            metrics.cache_hits.inc();
        }
        return response;
    }
    if let Some(metrics) = &cache.metrics {
        metrics.cache_misses.inc();
    }

    let response = next.run(request).await;
    if !cache.should_store(response.status(), response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "Couldn't read response body for caching");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let entry = CachedResponse {
        inserted: Instant::now(),
        status: parts.status,
        headers: parts.headers,
        body,
    };
    let response = entry.to_response();
    debug!(%key, "Caching response");
    cache.insert(key, entry);
    response
}
