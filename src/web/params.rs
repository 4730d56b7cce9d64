// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request parameters from the query string and urlencoded form body.

use crate::web::errors::HttpError;
use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::header;
use url::form_urlencoded;

/// Query string and form body parameters, query first.
///
/// Decoded like axum's `Query` and `Form`: invalid UTF-8 becomes U+FFFD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Parses a urlencoded string like `a=b&c=d`.
    pub fn parse(encoded: &str) -> Self {
        let mut params = Self::default();
        params.extend_encoded(encoded.as_bytes());
        params
    }

    fn extend_encoded(&mut self, encoded: &[u8]) {
        self.0.extend(form_urlencoded::parse(encoded).into_owned());
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// First value for `name`. Missing or empty is an HTTP 400.
    pub fn required(&self, name: &str) -> Result<&str, HttpError> {
        match self.get(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(HttpError::bad_request(format!(
                "Missing required parameter: {name}"
            ))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

#[async_trait]
impl<S> FromRequest<S> for Params
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut params = Params::parse(req.uri().query().unwrap_or_default());

        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| HttpError::bad_request(e.body_text()))?;
            params.extend_encoded(&body);
        }

        Ok(params)
    }
}
