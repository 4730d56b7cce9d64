// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! axum middleware, extractors and handlers.

pub mod cache;
pub mod canonical;
pub mod errors;
pub mod flash;
pub mod headers;
pub mod instance;
pub mod limiter;
pub mod metrics;
pub mod params;
pub mod regex;
pub mod tasks;
pub mod xrd;

pub use self::cache::{cached, ResponseCache};
pub use self::canonical::{canonical_domain, CanonicalDomain};
pub use self::errors::{error, handle_error, HttpError};
pub use self::flash::{flash_errors, Flash};
pub use self::headers::{default_headers, modern_headers, with_headers, WithHeaders};
pub use self::instance::{concurrent_requests, InstanceInfo};
pub use self::limiter::{rate_limit, Decision, RateLimiter};
pub use self::metrics::Metrics;
pub use self::params::Params;
pub use self::regex::{regex_path, RegexConverter};
pub use self::tasks::{cloud_tasks_only, TaskLogging};
pub use self::xrd::{HostMeta, Jrd, JrdLink, XrdFormat, XrdOrJrd};

use axum::extract::Request;
use axum::http::{header, HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use tracing::{info_span, Instrument};

/// Trace id of the current request, set by [`trace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceId(pub String);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Scheme and host of a request, e.g. `https://example.com`.
///
/// The scheme comes from `X-Forwarded-Proto`, else the URI, else `http`.
/// The host comes from the Host header, else the URI, else `localhost`.
pub fn host_url(uri: &Uri, headers: &HeaderMap) -> String {
    let scheme = header_str(headers, "x-forwarded-proto")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = header_str(headers, header::HOST.as_str())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Full URL of a request, including path and query.
pub fn request_url(uri: &Uri, headers: &HeaderMap) -> String {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{path}", host_url(uri, headers))
}

/// Trace id from `X-Cloud-Trace-Context`, then `traceparent`, else a new
/// random one.
pub fn trace_id(headers: &HeaderMap) -> String {
    header_str(headers, "x-cloud-trace-context")
        .and_then(|v| v.split(['/', ';']).next())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            header_str(headers, "traceparent")
                .and_then(|v| v.split('-').nth(1))
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:032x}", rand::thread_rng().gen::<u128>()))
}

/// Middleware that runs each request in a `request` span with its trace id
/// and path, and adds [`TraceId`] to the request extensions.
pub async fn trace(mut request: Request, next: Next) -> Response {
    let trace_id = trace_id(request.headers());
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let span = info_span!(
        "request",
        trace_id = trace_id.as_str(),
        path = path.as_str(),
        method = %request.method(),
    );
    request.extensions_mut().insert(TraceId(trace_id));
    next.run(request).instrument(span).await
}
