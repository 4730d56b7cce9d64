// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP errors returned from handlers and middleware.
//!
//! [`HttpError`] is a status code, a message and optional extra headers.
//! Besides the usual error statuses it has constructors for the success,
//! redirect and non-standard codes that handlers occasionally need to
//! "abort" with, e.g. 202 Accepted or 499 Client Closed Request.

use crate::error::Error;
use crate::interpret::interpret_http_error;
use crate::util::text::escape_html;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

/// An HTTP error response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code} {reason}: {message}", code = .status.as_u16(), reason = reason_phrase(.status))]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

/// Reason phrase for a status, including the non-standard codes used here.
pub fn reason_phrase(status: &StatusCode) -> &'static str {
    match status.as_u16() {
        499 => "Client Closed Request",
        599 => "Network Connect Timeout Error",
        _ => status.canonical_reason().unwrap_or("Unknown"),
    }
}

macro_rules! status_constructors {
    ($($name:ident => $code:expr),* $(,)?) => {
        $(
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new($code, message)
            }
        )*
    };
}

impl HttpError {
    /// Creates an error with any status in 100..=999. Other codes become 500.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    status_constructors! {
        created => 201,
        accepted => 202,
        no_content => 204,
        not_modified => 304,
        bad_request => 400,
        unauthorized => 401,
        payment_required => 402,
        forbidden => 403,
        not_found => 404,
        method_not_allowed => 405,
        proxy_authentication_required => 407,
        conflict => 409,
        gone => 410,
        misdirected_request => 421,
        unprocessable_entity => 422,
        upgrade_required => 426,
        precondition_required => 428,
        too_many_requests => 429,
        client_closed_request => 499,
        internal_server_error => 500,
        not_implemented => 501,
        bad_gateway => 502,
        service_unavailable => 503,
        gateway_timeout => 504,
        variant_also_negotiates => 506,
        insufficient_storage => 507,
        loop_detected => 508,
        not_extended => 510,
        network_authentication_required => 511,
        network_connect_timeout => 599,
    }

    /// 301 redirect to `location`.
    pub fn moved_permanently(location: &str) -> Self {
        Self::new(301, "").with_location(location)
    }

    /// 302 redirect to `location`.
    pub fn found(location: &str) -> Self {
        Self::new(302, "").with_location(location)
    }

    fn with_location(self, location: &str) -> Self {
        match HeaderValue::from_str(location) {
            Ok(value) => self.with_header(header::LOCATION, value),
            Err(_) => self,
        }
    }

    /// Adds a response header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            )],
            escape_html(&self.message, false),
        )
            .into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

/// Logs and returns an HTTP error.
pub fn error(message: impl Into<String>, status: u16) -> HttpError {
    let message = message.into();
    info!(status, "Returning {status}: {message}");
    HttpError::new(status, message)
}

/// Converts an error into a response.
///
/// HTTP errors pass through as is. Upstream HTTP and connection failures are
/// interpreted into a plain text error with the upstream status. Anything
/// else is logged and becomes a 500.
pub fn handle_error(err: Error) -> Response {
    if let Error::Http(e) = err {
        return e.into_response();
    }

    let (code, body) = interpret_http_error(&err);
    if let Some(status) = code.as_deref().and_then(|c| c.parse::<u16>().ok()) {
        let message = if status == 502 || status == 504 {
            format!("Upstream server request failed: {err}")
        } else {
            format!("HTTP Error {status}: {}", body.unwrap_or_default())
        };
        return (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response();
    }

    error!(error = %err, "Unhandled error");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        handle_error(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_http_error_response() {
        let response = HttpError::bad_request("no <good>").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "no &lt;good&gt;");
    }

    #[tokio::test]
    async fn test_nonstandard_statuses() {
        let response = HttpError::client_closed_request("bye").into_response();
        assert_eq!(response.status().as_u16(), 499);
        assert_eq!(HttpError::network_connect_timeout("x").status.as_u16(), 599);
        assert_eq!(
            HttpError::client_closed_request("bye").to_string(),
            "499 Client Closed Request: bye"
        );
        assert_eq!(HttpError::new(42, "x").status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_redirect() {
        let err = HttpError::found("http://foo/bar");
        assert_eq!(err.status, StatusCode::FOUND);
        assert_eq!(err.headers[header::LOCATION], "http://foo/bar");
        assert_eq!(HttpError::moved_permanently("/x").status.as_u16(), 301);
    }

    #[tokio::test]
    async fn test_handle_error_passes_through_http_errors() {
        let response = handle_error(Error::Http(HttpError::accepted("queued")));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_text(response).await, "queued");
    }

    #[tokio::test]
    async fn test_handle_error_upstream() {
        let response = handle_error(Error::HttpStatus {
            status: 401,
            url: "http://foo".to_string(),
            body: "nope".to_string(),
        });
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "HTTP Error 401: nope");

        let response = handle_error(Error::Connection {
            url: "http://foo".to_string(),
            message: "refused".to_string(),
        });
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(body_text(response)
            .await
            .starts_with("Upstream server request failed: "));
    }

    #[tokio::test]
    async fn test_handle_error_other() {
        let response = handle_error(Error::Datastore("boom".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
