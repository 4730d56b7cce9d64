// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Regex constraints on path parameters.

use crate::error::{Error, Result};
use crate::web::errors::HttpError;
use axum::extract::{RawPathParams, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::Regex;
use std::sync::Arc;

/// Requires a path parameter to fully match a regex.
///
/// ```ignore
/// let user = Arc::new(RegexConverter::new("user", "[a-z]+")?);
/// Router::new()
///     .route("/u/:user", get(handler))
///     .route_layer(middleware::from_fn_with_state(user, regex_path));
/// ```
#[derive(Debug, Clone)]
pub struct RegexConverter {
    param: String,
    regex: Regex,
}

impl RegexConverter {
    pub fn new(param: &str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| Error::InvalidValue(format!("bad regex {pattern}: {e}")))?;
        Ok(Self {
            param: param.to_string(),
            regex,
        })
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The value if it matches, else 404.
    pub fn convert<'a>(&self, value: &'a str) -> std::result::Result<&'a str, HttpError> {
        if self.is_match(value) {
            Ok(value)
        } else {
            Err(HttpError::not_found(""))
        }
    }
}

/// Route layer that 404s unless the converter's path param matches.
pub async fn regex_path(
    State(converter): State<Arc<RegexConverter>>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Response {
    let value = params
        .iter()
        .find(|(name, _)| *name == converter.param)
        .map(|(_, value)| value);
    match value.map(|v| converter.convert(v)) {
        Some(Ok(_)) => next.run(request).await,
        Some(Err(err)) => err.into_response(),
        None => HttpError::not_found("").into_response(),
    }
}
