// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for webutil

use crate::web::errors::HttpError;
use thiserror::Error;

/// Library error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Connection failure for {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Too many redirects from {url}")]
    TooManyRedirects { url: String },

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{0}")]
    Http(#[from] HttpError),
}

impl Error {
    /// Shorthand for an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::Http(e) => Some(e.status.as_u16()),
            Error::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Response body carried by this error, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::HttpStatus { body, .. } => Some(body),
            Error::Http(e) => Some(&e.message),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
