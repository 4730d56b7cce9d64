// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Interpreting upstream HTTP failures.
//!
//! Silo APIs report auth and rate limit problems in many shapes: HTTP
//! statuses, JSON `error` objects, Twitter-style `errors` arrays. This module
//! maps them onto a small set of status codes that callers act on:
//!
//! - 401: the user's credentials are revoked or invalid
//! - 429: rate limited
//! - 502: upstream server error
//! - 503: transient upstream error
//! - 504: connection failure

use crate::error::Error;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Substrings of Facebook `OAuthException` messages that mean the token is dead.
const OAUTH_REVOKED_MESSAGES: &[&str] = &[
    "token provided is invalid.",
    "authorization code has expired.",
    "the user is not a confirmed user.",
    "user must be an administrator of the page",
    "user is enrolled in a blocking, logged-in checkpoint",
    "access token belongs to a Page that has been deleted.",
];

const AUTH_ERROR_CODES: &[i64] = &[102, 190];
const AUTH_ERROR_SUBCODES: &[i64] = &[458, 459, 460, 463, 467, 490];

/// Returns true if the error is a network connection failure.
pub fn is_connection_failure(err: &Error) -> bool {
    let failure = match err {
        Error::Connection { .. } | Error::Timeout { .. } | Error::TooManyRedirects { .. } => true,
        Error::Request(e) => {
            e.is_connect() || e.is_timeout() || e.is_redirect() || e.is_body() || e.is_decode()
        }
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    };

    let msg = err.to_string();
    if failure
        || msg.contains("Connection closed unexpectedly")
        || msg.contains("Max retries exceeded")
        || msg.contains("Deadline exceeded")
    {
        info!(error = %err, "Connection failure");
        return true;
    }
    false
}

/// Extracts the `error` object from a JSON error body, if any.
fn json_error(body: &str) -> Map<String, Value> {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return Map::new();
    };

    let error = match &json {
        Value::Object(obj) => match obj.get("error") {
            Some(Value::Object(e)) => e.clone(),
            Some(other) => {
                let mut e = Map::new();
                e.insert("message".to_string(), Value::String(other.to_string()));
                e
            }
            None => Map::new(),
        },
        Value::String(s) => {
            let mut e = Map::new();
            e.insert("message".to_string(), Value::String(s.clone()));
            e
        }
        _ => Map::new(),
    };

    if !error.is_empty() {
        return error;
    }

    // twitter: {"errors": [{"code": ..., "message": ...}]}
    match json.get("errors").and_then(|e| e.as_array()).and_then(|e| e.first()) {
        Some(Value::Object(first)) => first.clone(),
        _ => Map::new(),
    }
}

/// Extracts the status code and response body from an error.
///
/// Returns `(code, body)`, either of which may be `None`. Codes are strings,
/// e.g. `"401"`. Connection failures return `"504"` with the error message as
/// the body.
pub fn interpret_http_error(err: &Error) -> (Option<String>, Option<String>) {
    let (mut code, mut body): (Option<String>, Option<String>) = match err {
        Error::Http(e) => (Some(e.status.as_u16().to_string()), Some(e.message.clone())),
        Error::HttpStatus { status, body, .. } => {
            let mut code = status.to_string();
            // flickr returns 418s and 400s when it's down
            if *status == 418
                || (*status == 400
                    && body.contains("Sorry, the Flickr API service is not currently available"))
            {
                code = "504".to_string();
            }
            (Some(code), Some(body.clone()))
        }
        Error::Connection { message, .. } => (None, Some(message.clone())),
        Error::Request(e) => (e.status().map(|s| s.as_u16().to_string()), None),
        Error::OAuth(msg) => {
            let code = if msg.starts_with("invalid_grant") {
                Some("401".to_string())
            } else if msg.starts_with("internal_failure") {
                Some("502".to_string())
            } else {
                None
            };
            (code, Some(msg.clone()))
        }
        _ => (None, None),
    };

    let orig_code = code.clone();
    if code.is_some() || body.is_some() {
        warn!(?code, ?body, "Error response");
    }

    let body_str = body.as_deref().unwrap_or_default();

    // instagram: revoked access or deleted account
    if body_str.contains("OAuthAccessTokenException")
        || body_str.contains("APIRequiresAuthenticationError")
    {
        code = Some("401".to_string());
    }

    // facebook and twitter
    let error = if body_str.is_empty() { Map::new() } else { json_error(body_str) };
    let error_type = error.get("type").and_then(Value::as_str).unwrap_or_default();
    let message = match error.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let err_code = error.get("code").and_then(Value::as_i64);
    let err_subcode = error.get("error_subcode").and_then(Value::as_i64);

    let revoked = (error_type == "OAuthException"
        && (OAUTH_REVOKED_MESSAGES.iter().any(|m| message.contains(m))
            || message == "Permissions error"))
        || (error_type == "FacebookApiException" && message.contains("Permissions error"))
        || (err_code.is_some_and(|c| AUTH_ERROR_CODES.contains(&c))
            && err_subcode.is_some_and(|s| AUTH_ERROR_SUBCODES.contains(&s)))
        || (err_code == Some(326) && message.contains("this account is temporarily locked"));
    if revoked {
        code = Some("401".to_string());
    }

    if error.get("is_transient").and_then(Value::as_bool).unwrap_or(false) {
        code = if code.as_deref() == Some("401") {
            match orig_code.as_deref() {
                Some("401") => Some("402".to_string()),
                _ => orig_code.clone(),
            }
        } else {
            Some("503".to_string())
        };
    }

    if code.as_deref() == Some("400")
        && error_type == "OAuthException"
        && (message.contains("Page request limit reached")
            || message.contains("Page request limited reached"))
    {
        code = Some("429".to_string());
    }

    // upstream errors and connection failures become 502s and 504s
    if code.as_deref() == Some("500") {
        code = Some("502".to_string());
    } else if is_connection_failure(err) {
        code = Some("504".to_string());
        if body.as_deref().unwrap_or_default().is_empty() {
            body = Some(err.to_string());
        }
    }

    if orig_code != code {
        info!(?orig_code, ?code, "Converting error code");
    }

    (code, body)
}

/// Swallows 4xx HTTP errors, returning `Ok(None)`. Other errors pass through.
pub fn ignore_http_4xx<T>(result: crate::error::Result<T>) -> crate::error::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            let (code, _) = interpret_http_error(&err);
            match code.and_then(|c| c.parse::<u16>().ok()) {
                Some(c) if c / 100 == 4 => Ok(None),
                _ => Err(err),
            }
        }
    }
}
