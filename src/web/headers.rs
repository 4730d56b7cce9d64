// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Response header middleware.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Extra script hosts allowed by the CSP on local development servers.
pub const LOCAL_CSP_HOSTS: &str = "localhost:8080 127.0.0.1:8080 my.dev.com:8080";

/// CORS, CSP and other security headers for modern browsers.
pub fn modern_headers(local_server: bool) -> HeaderMap {
    let csp_hosts = if local_server { LOCAL_CSP_HOSTS } else { "" };
    let csp = format!("script-src https: {csp_hosts} 'unsafe-inline'; frame-ancestors 'self'");

    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("access-control-allow-headers", "*"),
        ("access-control-allow-methods", "*"),
        ("access-control-allow-origin", "*"),
        ("strict-transport-security", "max-age=16070400; preload"),
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "SAMEORIGIN"),
        ("x-xss-protection", "1; mode=block"),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    if let Ok(csp) = HeaderValue::from_str(&csp) {
        headers.insert(HeaderName::from_static("content-security-policy"), csp);
    }
    headers
}

/// Middleware that adds headers a response doesn't already have.
///
/// Install with `middleware::from_fn_with_state(Arc::new(modern_headers(..)), default_headers)`.
pub async fn default_headers(
    State(headers): State<Arc<HeaderMap>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    for (name, value) in headers.iter() {
        if !response.headers().contains_key(name) {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

/// Headers for [`with_headers`], added to 2xx and 3xx responses and the
/// listed error statuses.
#[derive(Debug, Clone)]
pub struct WithHeaders {
    pub headers: HeaderMap,
    pub error_codes: Vec<u16>,
}

impl WithHeaders {
    /// Headers for 2xx, 3xx and 404 responses.
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            error_codes: vec![404],
        }
    }

    pub fn with_error_codes(mut self, error_codes: &[u16]) -> Self {
        self.error_codes = error_codes.to_vec();
        self
    }

    fn applies_to(&self, status: u16) -> bool {
        status < 400 || self.error_codes.contains(&status)
    }
}

/// Middleware that sets headers on responses, overriding existing values.
pub async fn with_headers(
    State(config): State<Arc<WithHeaders>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if config.applies_to(response.status().as_u16()) {
        for (name, value) in config.headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}
