// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Webmention endpoint discovery and sending.
//!
//! See <https://www.w3.org/TR/webmention/>.

use crate::error::{Error, Result};
use crate::html::{fetch_http_equiv, parse_html};
use crate::http::{HttpClient, RequestOptions, Response};
use crate::util::urls::{fragmentless, UrlParts};
use axum::http::{header, HeaderValue};
use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;
use tracing::debug;

static LINK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>; rel=["']?(https?://)?webmention(\.org/?)?["']?"#)
        .expect("valid Link header regex")
});

static LINK_OR_A: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link, a").expect("valid link selector"));

const REL_VALUES: &[&str] = &["webmention", "http://webmention.org/"];

/// Result of endpoint discovery.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// The endpoint URL, or `None` if the page doesn't advertise one
    pub endpoint: Option<String>,
    /// The fetched page
    pub response: Response,
}

/// What the HTML body says about the endpoint.
enum InHtml {
    Endpoint(String),
    Refresh(String),
    Nothing,
}

fn require_host(url: &str) -> Result<()> {
    match UrlParts::split(url) {
        Ok(parts) if !parts.netloc.is_empty() => Ok(()),
        Ok(_) => Err(Error::invalid_url(url, "no host")),
        Err(e) => Err(e),
    }
}

/// Resolves `href` against `base` and drops the fragment.
fn resolve(base: &str, href: &str) -> String {
    let joined = url::Url::parse(base)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string());
    fragmentless(&joined)
}

fn search_html(url: &str, text: &str) -> InHtml {
    let html = parse_html(text);

    let tagged = html.select(&LINK_OR_A).find_map(|elem| {
        let rel = elem.value().attr("rel")?;
        let href = elem.value().attr("href").filter(|h| !h.is_empty())?;
        rel.split_ascii_whitespace()
            .any(|r| REL_VALUES.contains(&r))
            .then(|| href.to_string())
    });
    if let Some(href) = tagged {
        return InHtml::Endpoint(resolve(url, &href));
    }

    let refresh = fetch_http_equiv(&html);
    if refresh.is_empty() {
        InHtml::Nothing
    } else {
        InHtml::Refresh(resolve(url, &refresh))
    }
}

/// Discovers a URL's webmention endpoint.
///
/// Follows HTTP redirects, and with `follow_meta_refresh`, at most one HTML
/// `<meta http-equiv="refresh">` redirect. The page's HTTP status is ignored,
/// since discovery may continue on non-2xx responses.
pub async fn discover(
    client: &HttpClient,
    url: &str,
    follow_meta_refresh: bool,
    opts: RequestOptions,
) -> Result<Endpoint> {
    let mut url = url.to_string();
    let mut follow_meta_refresh = follow_meta_refresh;

    loop {
        require_host(&url)?;
        debug!(url, "Webmention discovery: attempting");

        let response = client.get(&url, opts.clone()).await?;

        let from_header = response
            .headers
            .get_all(header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .find_map(|link| LINK_HEADER_RE.captures(link).map(|found| resolve(&url, &found[1])));
        if let Some(endpoint) = from_header {
            debug!(endpoint, "Webmention discovery: got endpoint in Link header");
            return Ok(Endpoint {
                endpoint: Some(endpoint),
                response,
            });
        }

        if let Some(content_type) = response.content_type() {
            if content_type.split(';').next().unwrap_or_default().trim() != "text/html" {
                debug!(content_type, "Webmention discovery: no endpoint in headers and content type is not HTML");
                return Ok(Endpoint {
                    endpoint: None,
                    response,
                });
            }
        }

        match search_html(&url, &response.text()) {
            InHtml::Endpoint(endpoint) => {
                debug!(endpoint, "Webmention discovery: got endpoint in tag");
                return Ok(Endpoint {
                    endpoint: Some(endpoint),
                    response,
                });
            }
            InHtml::Refresh(target) if follow_meta_refresh && target != url => {
                debug!(refresh = %target, "Webmention discovery: following http-equiv refresh");
                url = target;
                follow_meta_refresh = false;
            }
            _ => {
                debug!("Webmention discovery: no endpoint in headers or HTML");
                return Ok(Endpoint {
                    endpoint: None,
                    response,
                });
            }
        }
    }
}

/// Sends a webmention.
///
/// Redirects aren't followed, since they would turn the POST into a GET,
/// and are returned as is. 4xx and 5xx responses are errors.
pub async fn send(
    client: &HttpClient,
    endpoint: &str,
    source: &str,
    target: &str,
    opts: RequestOptions,
) -> Result<Response> {
    for url in [endpoint, source, target] {
        require_host(url)?;
    }
    debug!(source, target, "Webmention send");

    let opts = opts
        .with_header(header::ACCEPT, HeaderValue::from_static("*/*"))
        .with_form(vec![
            ("source".to_string(), source.to_string()),
            ("target".to_string(), target.to_string()),
        ])
        .no_redirects();

    let response = client.post(endpoint, opts).await?;
    debug!(
        status = response.status.as_u16(),
        location = response.header(header::LOCATION).unwrap_or_default(),
        "Webmention send: got response"
    );

    // redirects come back to the caller, only 4xx and 5xx fail
    response.error_for_status()
}
