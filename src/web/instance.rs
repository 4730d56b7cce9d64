// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-instance request concurrency stats, for developers.
//!
//! Install [`concurrent_requests`] as a layer and serve [`info`] at e.g.
//! `/_info`.

use super::metrics::Metrics;
use super::TraceId;
use crate::util::text::escape_html;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{Html, Response};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// How many concurrency peaks to keep.
pub const CONCURRENTS_SIZE: usize = 20;

/// A time when more than one request was running at once. Orders by count
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Concurrent {
    pub count: usize,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct InstanceState {
    current: HashSet<String>,
    // min-heap, so the lowest peak is evicted first
    concurrents: BinaryHeap<Reverse<Concurrent>>,
}

/// Shared instance stats.
#[derive(Debug, Default)]
pub struct InstanceInfo {
    state: Mutex<InstanceState>,
    next_id: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl InstanceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports in-flight requests and the peak to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start(&self, id: &str) {
        let mut state = self.lock();
        state.current.insert(id.to_string());
        let count = state.current.len();
        if count > 1 {
            state.concurrents.push(Reverse(Concurrent {
                count,
                when: Utc::now(),
            }));
            if state.concurrents.len() > CONCURRENTS_SIZE {
                state.concurrents.pop();
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.in_flight.set(count as i64);
            if count as i64 > metrics.peak_concurrent.get() {
                metrics.peak_concurrent.set(count as i64);
            }
        }
    }

    fn finish(&self, id: &str) {
        let mut state = self.lock();
        state.current.remove(id);
        if let Some(metrics) = &self.metrics {
            metrics.in_flight.set(state.current.len() as i64);
        }
    }

    /// Ids of the requests currently running, sorted.
    pub fn current_requests(&self) -> Vec<String> {
        let mut current: Vec<String> = self.lock().current.iter().cloned().collect();
        current.sort();
        current
    }

    /// Recorded concurrency peaks, highest first.
    pub fn concurrents(&self) -> Vec<Concurrent> {
        let mut concurrents: Vec<Concurrent> =
            self.lock().concurrents.iter().map(|Reverse(c)| *c).collect();
        concurrents.sort_by(|a, b| b.cmp(a));
        concurrents
    }

    /// Unique per request. Trace ids can be shared or client-chosen, so
    /// they're only logged.
    fn request_id(&self, request: &Request) -> String {
        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Some(TraceId(trace)) = request.extensions().get::<TraceId>() {
            debug!(id, trace, "Request started");
        }
        id
    }
}

/// Removes the request from the current set when dropped, so cancelled
/// requests are cleaned up too.
struct RequestGuard<'a> {
    info: &'a InstanceInfo,
    id: String,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.info.finish(&self.id);
    }
}

/// Middleware that records concurrent requests.
pub async fn concurrent_requests(
    State(info): State<Arc<InstanceInfo>>,
    request: Request,
    next: Next,
) -> Response {
    let id = info.request_id(&request);
    info.start(&id);
    let _guard = RequestGuard { info: &info, id };
    next.run(request).await
}

/// Renders current requests and concurrency peaks.
pub async fn info(State(info): State<Arc<InstanceInfo>>) -> Html<String> {
    let runtime = std::env::var("GAE_RUNTIME").unwrap_or_else(|_| "unknown".to_string());

    let mut html = format!(
        "<html>\n<body>\n<h2>Runtime</h2>\n<p>{}</p>\n<h2>Current requests</h2>\n<ul>\n",
        escape_html(&runtime, false)
    );
    for id in info.current_requests() {
        html.push_str(&format!("<li>{}</li>\n", escape_html(&id, false)));
    }
    html.push_str("</ul>\n<h2>Concurrent requests</h2>\n<table>\n<tr><th>Count</th><th>When</th></tr>\n");
    for Concurrent { count, when } in info.concurrents() {
        html.push_str(&format!(
            "<tr><td>{count}</td><td>{}</td></tr>\n",
            when.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    html.push_str("</table>\n</body>\n</html>\n");
    Html(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::routing::get;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    #[test]
    fn test_keeps_top_concurrents() {
        let info = InstanceInfo::new();
        for i in 0..30 {
            info.start(&format!("r{i}"));
        }
        assert_eq!(info.current_requests().len(), 30);

        let concurrents = info.concurrents();
        assert_eq!(concurrents.len(), CONCURRENTS_SIZE);
        assert_eq!(concurrents[0].count, 30);
        assert_eq!(concurrents[CONCURRENTS_SIZE - 1].count, 11);

        for i in 0..30 {
            info.finish(&format!("r{i}"));
        }
        assert!(info.current_requests().is_empty());
        assert_eq!(info.concurrents().len(), CONCURRENTS_SIZE);
    }

    #[test]
    fn test_single_request_isnt_concurrent() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let info = InstanceInfo::new().with_metrics(metrics.clone());
        info.start("a");
        assert!(info.concurrents().is_empty());
        assert_eq!(metrics.in_flight.get(), 1);

        info.start("b");
        assert_eq!(metrics.peak_concurrent.get(), 2);
        info.finish("a");
        info.finish("b");
        assert_eq!(metrics.in_flight.get(), 0);
        assert_eq!(metrics.peak_concurrent.get(), 2);
    }

    #[test]
    fn test_shared_trace_id_counts_twice() {
        let info = InstanceInfo::new();
        let traced = || {
            let mut request = Request::new(Body::empty());
            request.extensions_mut().insert(TraceId("same".to_string()));
            request
        };

        let a = info.request_id(&traced());
        let b = info.request_id(&traced());
        assert_ne!(a, b);

        info.start(&a);
        info.start(&b);
        assert_eq!(info.current_requests().len(), 2);
        assert_eq!(info.concurrents().len(), 1);

        info.finish(&a);
        assert_eq!(info.current_requests(), vec![b.clone()]);
        info.finish(&b);
        assert!(info.current_requests().is_empty());
    }

    #[tokio::test]
    async fn test_middleware_and_info() {
        let info = Arc::new(InstanceInfo::new());
        let seen = info.clone();
        let app = Router::new()
            .route(
                "/",
                get(move || {
                    let seen = seen.clone();
                    async move { seen.current_requests().join(",") }
                }),
            )
            .route("/_info", get(super::info))
            .layer(middleware::from_fn_with_state(info.clone(), concurrent_requests))
            .with_state(info.clone());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"req-0");
        assert!(info.current_requests().is_empty());

        let response = app
            .oneshot(Request::builder().uri("/_info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<li>req-1</li>"));
        assert!(body.contains("<h2>Concurrent requests</h2>"));
    }
}
