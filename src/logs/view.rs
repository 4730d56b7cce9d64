// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Handler that renders the captured logs of a single request.
//!
//! Query params:
//! - `start_time`: seconds since the epoch, roughly when the request happened
//! - `key`: token to find in one of the request's log messages
//! - `module`, `path` (optional): filters on the logging module and the
//!   request path, comma-separated for multiple paths

use super::capture::{LogEntry, LogStore};
use super::{linkify_datastore_keys, sanitize, MAX_START_TIME, MIN_START_TIME};
use crate::util::misc::is_float;
use crate::util::text::{escape_html, linkify, PrettyLink};
use crate::util::urls::unquote_plus;
use crate::web::errors::{error, HttpError};
use crate::web::params::Params;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

/// Log viewer state.
#[derive(Debug, Clone)]
pub struct LogViewer {
    store: Arc<LogStore>,
    app_id: String,
    module: Option<String>,
    paths: Vec<String>,
}

impl LogViewer {
    pub fn new(store: Arc<LogStore>, app_id: &str) -> Self {
        Self {
            store,
            app_id: app_id.to_string(),
            module: None,
            paths: Vec::new(),
        }
    }

    /// Only search logs from this module. Overrides the `module` param.
    pub fn with_module(mut self, module: &str) -> Self {
        self.module = Some(module.to_string());
        self
    }

    /// Only search logs for these request paths. Overrides the `path` param.
    pub fn with_paths(mut self, paths: &[&str]) -> Self {
        self.paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    fn render_entry(&self, entry: &LogEntry) -> String {
        let msg = if entry.message.starts_with("Created by this poll:") {
            entry.message.clone()
        } else {
            sanitize(&entry.message)
        };
        let msg = linkify(&escape_html(&msg, false), false, false, &PrettyLink::default());
        let msg = linkify_datastore_keys(&msg, &self.app_id);
        format!(
            "{} {} {}<br />",
            entry.severity(),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.6f%:z"),
            msg.replace('\n', "<br />"),
        )
    }

    /// Finds the request that logged `key` and renders all of its logs.
    pub fn render(
        &self,
        start_time: f64,
        key: &str,
        module: Option<&str>,
        paths: &[String],
    ) -> Result<Response, HttpError> {
        let start = DateTime::<Utc>::from_timestamp_millis((start_time * 1000.0) as i64)
            .ok_or_else(|| HttpError::bad_request(format!("Bad start_time {start_time}")))?;
        let from = start - Duration::seconds(60);
        let to = start + Duration::seconds(120);

        // don't log key, it would match future searches
        info!("Searching logs...");
        let found = self.store.find_first(from, to, |entry| {
            entry.message.contains(key)
                && module.map_or(true, |m| entry.target.starts_with(m))
                && (paths.is_empty()
                    || entry
                        .path
                        .as_deref()
                        .is_some_and(|p| paths.iter().any(|want| p.contains(want.as_str()))))
        });
        let Some(found) = found else {
            info!("No log found!");
            return Ok((StatusCode::NOT_FOUND, "No log found!").into_response());
        };

        let entries = match &found.trace {
            Some(trace) => {
                info!(trace = %trace, "Got trace");
                self.store.by_trace(trace, from, to)
            }
            None => vec![found],
        };

        let mut body = String::from("<html>\n<body style=\"font-family: monospace; white-space: pre\">\n");
        for entry in entries.iter().filter(|e| !e.message.is_empty()) {
            body.push_str(&self.render_entry(entry));
        }
        body.push_str("</body>\n</html>");

        Ok((
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response())
    }
}

/// `GET /log` handler.
pub async fn log(State(viewer): State<LogViewer>, params: Params) -> Result<Response, HttpError> {
    let start_time = params.required("start_time")?;
    if !is_float(start_time) {
        return Err(error(
            format!("Couldn't convert start_time to float: '{start_time}'"),
            400,
        ));
    }
    let start_time: f64 = start_time
        .trim()
        .parse()
        .map_err(|_| error(format!("Couldn't convert start_time to float: '{start_time}'"), 400))?;
    if start_time < MIN_START_TIME {
        return Err(error(format!("start_time must be >= {MIN_START_TIME:.1}"), 400));
    } else if start_time > MAX_START_TIME {
        return Err(error(format!("start_time must be <= {MAX_START_TIME:.1}"), 400));
    }

    let key = unquote_plus(params.required("key")?);

    let module = viewer
        .module
        .clone()
        .or_else(|| params.get("module").filter(|m| !m.is_empty()).map(str::to_string));
    let paths = if viewer.paths.is_empty() {
        params
            .get("path")
            .map(|p| p.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    } else {
        viewer.paths.clone()
    };

    viewer.render(start_time, &key, module.as_deref(), &paths)
}
