// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outbound HTTP requests.
//!
//! [`HttpClient`] wraps reqwest with:
//! - a default User-Agent and timeout
//! - a response size limit for text and application content types
//! - "gateway" mode for request handlers that proxy upstream servers, where
//!   bad URLs become HTTP 400s and upstream failures HTTP 502s
//! - POSTs that follow redirects with POST
//! - HEAD-based redirect resolution with a TTL cache

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::util::urls::{clean_url, urlencode, UrlParts};
use crate::web::errors::HttpError;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Status used for responses that exceed the size limit.
pub const RESPONSE_TOO_BIG_STATUS: u16 = 422;

/// Status used by [`HttpClient::follow_redirects`] when the request fails.
pub const RESOLVE_FAILED_STATUS: u16 = 499;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL, after any redirects
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// A response with no headers or body, for requests that never completed.
    pub fn synthetic(url: &str, status: u16) -> Self {
        Self {
            url: url.to_string(),
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Value of a header, if present and valid UTF-8.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    /// True for statuses below 400.
    pub fn is_ok(&self) -> bool {
        self.status.as_u16() < 400
    }

    /// True for redirect statuses that carry a `Location`.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.as_u16(), 301 | 302 | 303 | 307 | 308)
            && self.headers.contains_key(header::LOCATION)
    }

    /// Returns an [`Error::HttpStatus`] for 4xx and 5xx responses.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::HttpStatus {
                status: self.status.as_u16(),
                url: self.url.clone(),
                body: self.text(),
            })
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra request headers. A User-Agent here overrides the default.
    pub headers: HeaderMap,
    /// Form fields, sent urlencoded as the request body
    pub form: Option<Vec<(String, String)>>,
    /// Whether to follow redirects. Defaults to true except for HEAD.
    pub allow_redirects: Option<bool>,
    /// Convert failures to HTTP 400 and 502 errors for the calling handler.
    pub gateway: bool,
}

impl RequestOptions {
    pub fn gateway() -> Self {
        Self {
            gateway: true,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_form(mut self, form: Vec<(String, String)>) -> Self {
        self.form = Some(form);
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.allow_redirects = Some(false);
        self
    }
}

/// TTL cache of resolved redirects, keyed by URL.
#[derive(Debug)]
struct RedirectCache {
    entries: DashMap<String, (Instant, Response)>,
    ttl: Duration,
    capacity: usize,
}

impl RedirectCache {
    fn get(&self, url: &str) -> Option<Response> {
        let entry = self.entries.get(url)?;
        let (inserted, response) = entry.value();
        if inserted.elapsed() < self.ttl {
            Some(response.clone())
        } else {
            drop(entry);
            self.entries.remove(url);
            None
        }
    }

    fn insert(&self, url: String, response: Response) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&url) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().0)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(url, (Instant::now(), response));
    }
}

/// HTTP client with logging, size limits and redirect helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    no_redirects: reqwest::Client,
    config: HttpConfig,
    redirects: Arc<RedirectCache>,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;
        let no_redirects = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let redirects = Arc::new(RedirectCache {
            entries: DashMap::new(),
            ttl: config.redirect_cache_ttl(),
            capacity: config.redirect_cache_size,
        });

        Ok(Self {
            client,
            no_redirects,
            config,
            redirects,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub async fn get(&self, url: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::GET, url, opts).await
    }

    pub async fn head(&self, url: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::HEAD, url, opts).await
    }

    pub async fn post(&self, url: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::POST, url, opts).await
    }

    pub async fn delete(&self, url: &str, opts: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, url, opts).await
    }

    /// Makes a request and reads the response body, up to the size limit.
    pub async fn request(&self, method: Method, url: &str, opts: RequestOptions) -> Result<Response> {
        info!(%method, url, gateway = opts.gateway, "HTTP request");

        let parsed = match url::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) if opts.gateway => {
                let msg = format!("Bad URL {url} : {e}");
                warn!("{msg}");
                return Err(HttpError::bad_request(msg).into());
            }
            Err(e) => return Err(Error::invalid_url(url, e.to_string())),
        };

        let follow = opts.allow_redirects.unwrap_or(method != Method::HEAD);
        let client = if follow { &self.client } else { &self.no_redirects };

        let mut request = client.request(method, parsed).headers(opts.headers);
        if let Some(form) = &opts.form {
            request = request
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(urlencode(form));
        }

        let mut resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) if opts.gateway => {
                warn!(error = %e, "Upstream request failed");
                return Err(HttpError::bad_gateway(e.to_string()).into());
            }
            Err(e) => return Err(map_request_error(url, e)),
        };

        let status = resp.status();
        let headers = resp.headers().clone();
        let final_url = resp.url().to_string();
        if final_url != url {
            info!(url = %final_url, "Redirected");
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let limited = content_type.starts_with("text/") || content_type.starts_with("application/");
        let max = self.config.max_response_size;

        let declared_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok());

        let mut too_big = None;
        let mut body = Vec::new();
        if limited && declared_length.is_some_and(|len| len > max) {
            too_big = declared_length;
        } else {
            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => {
                        body.extend_from_slice(&chunk);
                        if limited && body.len() > max {
                            too_big = Some(body.len());
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) if opts.gateway => {
                        return Err(HttpError::bad_gateway(e.to_string()).into());
                    }
                    Err(e) => return Err(map_request_error(url, e)),
                }
            }
        }

        let mut response = Response {
            url: final_url,
            status,
            headers,
            body: Bytes::from(body),
        };

        if opts.gateway && !response.is_ok() {
            let text = response.text();
            let msg = format!(
                "{} {} for url: {} ; {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
                response.url,
                text.chars().take(500).collect::<String>()
            );
            warn!("{msg}");
            return Err(HttpError::bad_gateway(msg).into());
        }

        if let Some(length) = too_big {
            let msg = format!("Content-Length {length} is larger than our limit {max}.");
            warn!(url = %response.url, "{msg}");
            response.status = StatusCode::UNPROCESSABLE_ENTITY;
            response.body = Bytes::from(msg);
            if opts.gateway {
                return response.error_for_status();
            }
        }

        if status.is_redirection() {
            let location = response.header(header::LOCATION).unwrap_or("no Location header");
            info!(status = status.as_u16(), location, "Received {}", status.as_u16());
        } else {
            info!(status = response.status.as_u16(), "Received {}", response.status.as_u16());
        }

        Ok(response)
    }

    /// POSTs, and follows redirects with POST instead of GET.
    ///
    /// Errors on 4xx/5xx and after too many redirects.
    pub async fn post_with_redirects(&self, url: &str, opts: RequestOptions) -> Result<Response> {
        let mut url = url.to_string();
        for _ in 0..self.config.max_redirects {
            let resp = self.post(&url, opts.clone().no_redirects()).await?;
            match resp.header(header::LOCATION) {
                Some(location) if resp.is_redirect() => {
                    url = url::Url::parse(&resp.url)
                        .and_then(|base| base.join(location))
                        .map(|u| u.to_string())
                        .unwrap_or_else(|_| location.to_string());
                }
                _ => return resp.error_for_status(),
            }
        }
        Err(Error::TooManyRedirects { url })
    }

    /// Resolves redirects for a URL with HEAD requests. Cached.
    ///
    /// Never fails. A request error gives a response with status 499 and
    /// the input URL, so check the status. The final URL is in `url`.
    pub fn follow_redirects<'a>(
        &'a self,
        url: &'a str,
        headers: Option<&'a HeaderMap>,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + 'a>> {
        Box::pin(async move {
            if let Some(cached) = self.redirects.get(url) {
                debug!(url, "follow_redirects cache hit");
                return cached;
            }

            let resolved = self.follow_redirects_uncached(url, headers).await;
            self.redirects.insert(url.to_string(), resolved.clone());
            if resolved.url != url {
                self.redirects.insert(resolved.url.clone(), resolved.clone());
            }
            resolved
        })
    }

    /// [`follow_redirects`](Self::follow_redirects) without the cache.
    pub async fn follow_redirects_uncached(&self, url: &str, headers: Option<&HeaderMap>) -> Response {
        let url = match UrlParts::split(url) {
            Ok(parts) if parts.scheme.is_empty() => format!("http://{url}"),
            _ => url.to_string(),
        };

        let opts = RequestOptions {
            headers: headers.cloned().unwrap_or_default(),
            allow_redirects: Some(true),
            ..Default::default()
        };
        let mut resolved = match self.head(&url, opts).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "Couldn't resolve URL");
                Response::synthetic(&url, RESOLVE_FAILED_STATUS)
            }
        };

        if !resolved.is_ok() {
            warn!(url, resolved = %resolved.url, "Couldn't resolve URL");
        } else if resolved.url != url {
            debug!(url, resolved = %resolved.url, "Resolved URL");
        }

        // the content type of an error response isn't useful
        if !resolved.is_ok() || resolved.content_type().is_none() {
            let guessed = guess_content_type(&resolved.url).unwrap_or("text/html");
            resolved
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(guessed));
        }

        let refresh_target = resolved.header("refresh").and_then(|refresh| {
            refresh
                .split(';')
                .map(str::trim)
                .find_map(|part| part.strip_prefix("url="))
                .map(str::to_string)
        });
        if let Some(target) = refresh_target {
            return self.follow_redirects(&target, headers).await;
        }

        if let Some(cleaned) = clean_url(&resolved.url) {
            resolved.url = cleaned;
        }
        resolved
    }
}

fn map_request_error(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        Error::Connection {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else if e.is_redirect() {
        Error::TooManyRedirects {
            url: url.to_string(),
        }
    } else {
        Error::Request(e)
    }
}

/// Guesses a MIME type from a URL's file extension.
pub fn guess_content_type(url: &str) -> Option<&'static str> {
    let path = UrlParts::split(url).ok()?.path;
    let ext = path.rsplit('/').next()?.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "atom" => "application/atom+xml",
        "rss" => "application/rss+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => return None,
    })
}
