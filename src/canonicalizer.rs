// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Converts URLs to their canonical form.

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::util::urls::UrlParts;
use axum::http::HeaderMap;
use regex::Regex;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Canonicalizes URLs for a single site.
///
/// URLs matching `approve` are canonical as is and URLs matching `reject` are
/// never canonical, both without following redirects. If following redirects
/// gives a 4xx or 5xx, the URL isn't canonical.
#[derive(Debug, Clone)]
pub struct UrlCanonicalizer {
    /// Canonical scheme. `None` keeps the input's scheme.
    pub scheme: Option<String>,
    /// Canonical domain. URLs on other domains are rejected.
    pub domain: Option<String>,
    /// Subdomain to add to bare domains, e.g. `www`
    pub subdomain: Option<String>,
    pub approve: Option<Regex>,
    pub reject: Option<Regex>,
    /// Keep the query string
    pub query: bool,
    /// Keep the fragment
    pub fragment: bool,
    /// Whether paths should end in `/`
    pub trailing_slash: bool,
    /// Whether to HEAD URLs to follow redirects
    pub redirects: bool,
    /// Headers for the redirect HEAD requests
    pub headers: Option<HeaderMap>,
}

impl Default for UrlCanonicalizer {
    fn default() -> Self {
        Self {
            scheme: Some("https".to_string()),
            domain: None,
            subdomain: None,
            approve: None,
            reject: None,
            query: false,
            fragment: false,
            trailing_slash: false,
            redirects: true,
            headers: None,
        }
    }
}

/// Compiles a pattern that must match at the start of the URL.
fn prefix_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| Error::InvalidValue(format!("bad regex {pattern}: {e}")))
}

impl UrlCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approve(mut self, pattern: &str) -> Result<Self> {
        self.approve = Some(prefix_regex(pattern)?);
        Ok(self)
    }

    pub fn with_reject(mut self, pattern: &str) -> Result<Self> {
        self.reject = Some(prefix_regex(pattern)?);
        Ok(self)
    }

    /// Rewrites a URL's domain, scheme, query, fragment and trailing slash.
    ///
    /// Returns `None` if the URL has no host or is on another domain.
    fn normalize(&self, url: &str) -> Option<String> {
        let parsed = UrlParts::split(url).ok()?;
        let mut domain = parsed.hostname()?;

        if let Some(canonical) = &self.domain {
            if &domain != canonical && !domain.ends_with(&format!(".{canonical}")) {
                return None;
            }
        }
        if let Some(stripped) = domain.strip_prefix("www.") {
            domain = stripped.to_string();
        }
        if let Some(subdomain) = &self.subdomain {
            if domain.matches('.').count() == 1 {
                domain = format!("{subdomain}.{domain}");
            }
        }

        let mut path = parsed.path;
        if self.trailing_slash && !path.ends_with('/') {
            path.push('/');
        } else if !self.trailing_slash && path.ends_with('/') {
            path.pop();
        }

        let normalized = UrlParts {
            scheme: self.scheme.clone().unwrap_or(parsed.scheme),
            netloc: domain,
            path,
            query: if self.query { parsed.query } else { String::new() },
            fragment: if self.fragment { parsed.fragment } else { String::new() },
        };
        Some(normalized.unsplit())
    }

    /// Returns the canonical form of a URL, or `None` if it can't be
    /// canonicalized, e.g. its domain doesn't match.
    ///
    /// `redirects` overrides [`redirects`](Self::redirects) for this call.
    pub fn canonicalize<'a>(
        &'a self,
        client: &'a HttpClient,
        url: &'a str,
        redirects: Option<bool>,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            if self.approve.as_ref().is_some_and(|re| re.is_match(url)) {
                return Some(url.to_string());
            }
            if self.reject.as_ref().is_some_and(|re| re.is_match(url)) {
                return None;
            }

            let normalized = self.normalize(url)?;
            if normalized != url {
                // recheck approve and reject
                return self.canonicalize(client, &normalized, redirects).await;
            }

            if redirects.unwrap_or(self.redirects) {
                let resp = client.follow_redirects(url, self.headers.as_ref()).await;
                if matches!(resp.status.as_u16() / 100, 4 | 5) {
                    debug!(url, status = resp.status.as_u16(), "Not canonical");
                    return None;
                }
                if resp.url != url {
                    return self.canonicalize(client, &resp.url, Some(false)).await;
                }
            }

            Some(url.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn check(expected: Option<&str>, input: &str, canon: UrlCanonicalizer) {
        let client = HttpClient::new(Default::default()).unwrap();
        assert_eq!(
            canon.canonicalize(&client, input, Some(false)).await.as_deref(),
            expected,
            "{input}"
        );
    }

    fn canon() -> UrlCanonicalizer {
        UrlCanonicalizer::new()
    }

    #[tokio::test]
    async fn test_scheme_and_domain() {
        check(Some("https://fa.ke/post"), "http://www.fa.ke/post", canon()).await;
        let http = UrlCanonicalizer {
            scheme: Some("http".into()),
            ..canon()
        };
        check(Some("http://fa.ke/123"), "https://fa.ke/123", http).await;

        let fake = UrlCanonicalizer {
            domain: Some("fa.ke".into()),
            ..canon()
        };
        check(Some("https://fa.ke/123"), "http://fa.ke/123", fake).await;
        let abc = UrlCanonicalizer {
            domain: Some("a.bc".into()),
            ..canon()
        };
        check(None, "http://fa.ke/123", abc).await;
        check(None, "mailto:xyz@fa.ke", canon()).await;
    }

    #[tokio::test]
    async fn test_subdomain() {
        let sub = |s: &str| UrlCanonicalizer {
            subdomain: Some(s.to_string()),
            ..canon()
        };
        check(Some("https://www.fa.ke/123"), "https://fa.ke/123", sub("www")).await;
        check(Some("https://foo.fa.ke/123"), "https://www.fa.ke/123", sub("foo")).await;
        check(Some("https://foo.fa.ke/123"), "https://foo.fa.ke/123", sub("bar")).await;
    }

    #[tokio::test]
    async fn test_query_fragment_slash() {
        let query = UrlCanonicalizer {
            query: true,
            ..canon()
        };
        check(Some("https://fa.ke/123?x=y"), "http://fa.ke/123?x=y", query).await;
        check(Some("https://fa.ke/123"), "http://fa.ke/123?x=y#abc", canon()).await;

        let fragment = UrlCanonicalizer {
            fragment: true,
            ..canon()
        };
        check(Some("https://fa.ke/123#abc"), "http://fa.ke/123#abc", fragment).await;

        let slash = UrlCanonicalizer {
            trailing_slash: true,
            ..canon()
        };
        check(Some("https://fa.ke/123/"), "http://fa.ke/123", slash).await;
        check(Some("https://fa.ke/123"), "http://fa.ke/123/", canon()).await;

        let all = UrlCanonicalizer {
            query: true,
            fragment: true,
            trailing_slash: true,
            ..canon()
        };
        check(Some("https://fa.ke/123/?x=y#abc"), "http://fa.ke/123?x=y#abc", all).await;
    }

    #[tokio::test]
    async fn test_approve_reject() {
        let approve = canon().with_approve(".*/good").unwrap();
        check(Some("http://fa.ke/good"), "http://fa.ke/good", approve).await;
        let reject = canon().with_reject(".*/bad").unwrap();
        check(None, "http://fa.ke/bad", reject).await;
        assert!(canon().with_approve("(").is_err());
    }
}
