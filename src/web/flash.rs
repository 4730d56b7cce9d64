// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Cookie-backed flash messages.
//!
//! Handlers take a [`Flash`] extractor, add messages with [`Flash::flash`]
//! or read and clear them with [`Flash::take_flashed`], and return it as a
//! response part so the cookie is updated.

use crate::error::Error;
use crate::interpret::interpret_http_error;
use crate::util::text::{linkify, PrettyLink};
use crate::web::errors::HttpError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, IntoResponseParts, Response, ResponseParts};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::convert::Infallible;
use tracing::{info, warn};

pub const FLASH_COOKIE: &str = "flash";

/// Where [`flash_errors`] redirects to.
pub const LOGIN_PATH: &str = "/login";

/// Pending flash messages for the current client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flash {
    messages: Vec<String>,
}

impl Flash {
    /// Reads messages from the request's flash cookie. A malformed cookie
    /// reads as empty.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let messages = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == FLASH_COOKIE)
            .and_then(|(_, value)| URL_SAFE_NO_PAD.decode(value).ok())
            .and_then(|json| serde_json::from_slice(&json).ok())
            .unwrap_or_default();
        Self { messages }
    }

    /// Adds a message to show on the next page.
    pub fn flash(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("Flashed message: {msg}");
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Returns and clears the pending messages.
    pub fn take_flashed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    /// `Set-Cookie` value that stores the pending messages, or expires the
    /// cookie if there are none.
    pub fn set_cookie(&self) -> HeaderValue {
        let cookie = if self.messages.is_empty() {
            format!("{FLASH_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
        } else {
            let json = serde_json::to_vec(&self.messages).unwrap_or_default();
            format!(
                "{FLASH_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
                URL_SAFE_NO_PAD.encode(json)
            )
        };
        // base64url and the attributes are all visible ASCII
        HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Flash
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

impl IntoResponseParts for Flash {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        res.headers_mut().append(header::SET_COOKIE, self.set_cookie());
        Ok(res)
    }
}

/// Flashes an error and redirects to [`LOGIN_PATH`].
///
/// The message is the upstream response body if there was one, else the
/// error itself, linkified. For OAuth and other login flows.
pub fn flash_errors(err: &Error, mut flash: Flash) -> Response {
    warn!(error = %err, "Flashing error");
    let (_, body) = interpret_http_error(err);
    let msg = body.filter(|b| !b.is_empty()).unwrap_or_else(|| err.to_string());
    flash.flash(linkify(&msg, true, false, &PrettyLink::default()));
    (flash, HttpError::found(LOGIN_PATH)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn cookie_header(flash: &Flash) -> HeaderMap {
        let set_cookie = flash.set_cookie();
        let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, format!("a=b; {pair}").parse().unwrap());
        headers
    }

    #[test]
    fn test_flash_round_trip_through_cookie() {
        let mut flash = Flash::default();
        flash.flash("hello");
        flash.flash("wörld; =x");

        let mut read = Flash::from_headers(&cookie_header(&flash));
        assert_eq!(read.messages(), ["hello", "wörld; =x"]);
        assert_eq!(read.take_flashed(), vec!["hello", "wörld; =x"]);
        assert!(read.messages().is_empty());
        assert!(read.set_cookie().to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_bad_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "flash=!!!".parse().unwrap());
        assert_eq!(Flash::from_headers(&headers), Flash::default());
    }

    #[test]
    fn test_flash_errors() {
        let err = Error::HttpStatus {
            status: 400,
            url: "http://foo.com".to_string(),
            body: "see http://foo.com/bar".to_string(),
        };
        let response = flash_errors(&err, Flash::default());
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let mut headers = HeaderMap::new();
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        headers.insert(header::COOKIE, set_cookie.split(';').next().unwrap().parse().unwrap());
        let flashed = Flash::from_headers(&headers).take_flashed();
        assert_eq!(flashed.len(), 1);
        assert!(flashed[0].starts_with("see <a "));
        assert!(flashed[0].contains(r#"href="http://foo.com/bar""#));
    }

    #[test]
    fn test_flash_errors_without_body() {
        let err = Error::InvalidValue("nope".to_string());
        let response = flash_errors(&err, Flash::default());
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }
}
