// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Redirects requests on alternate domains to the canonical one.

use super::request_url;
use crate::config::DomainConfig;
use crate::web::errors::HttpError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Domains to redirect `from`, and the domain to redirect them `to`.
#[derive(Debug, Clone)]
pub struct CanonicalDomain {
    from: Vec<String>,
    to: String,
}

impl CanonicalDomain {
    pub fn new<S: AsRef<str>>(from: &[S], to: &str) -> Self {
        Self {
            from: from.iter().map(|d| d.as_ref().to_lowercase()).collect(),
            to: to.to_string(),
        }
    }

    /// `None` if the config has no `to` domain.
    pub fn from_config(config: &DomainConfig) -> Option<Self> {
        config.to.as_deref().map(|to| Self::new(config.from.as_slice(), to))
    }

    /// Where to redirect a request for `url`, if anywhere.
    pub fn redirect_for(&self, url: &str) -> Option<String> {
        let mut parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        if !self.from.contains(&host) {
            return None;
        }
        parsed.set_host(Some(&self.to)).ok()?;
        parsed.set_port(None).ok()?;
        Some(parsed.to_string())
    }
}

/// Middleware that 301s requests for the `from` domains.
pub async fn canonical_domain(
    State(domain): State<Arc<CanonicalDomain>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(location) = domain.redirect_for(&request_url(request.uri(), request.headers())) {
        debug!(%location, "Redirecting to canonical domain");
        return HttpError::moved_permanently(&location).into_response();
    }
    next.run(request).await
}
