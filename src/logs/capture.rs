// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! In-process log capture for the log viewer.
//!
//! [`LogCapture`] is a tracing layer that copies every event into a bounded
//! [`LogStore`], tagged with the trace id and request path of the request
//! span it happened in.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Span field holding the request's trace id.
pub const TRACE_ID_FIELD: &str = "trace_id";
/// Span field holding the request path and query.
pub const PATH_FIELD: &str = "path";

/// One captured log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    /// Module path of the code that logged
    pub target: String,
    pub message: String,
    pub trace: Option<String>,
    pub path: Option<String>,
}

impl LogEntry {
    /// First letter of the severity: `D`, `I`, `W`, `E` or `T`.
    pub fn severity(&self) -> char {
        match self.level {
            Level::TRACE => 'T',
            Level::DEBUG => 'D',
            Level::INFO => 'I',
            Level::WARN => 'W',
            Level::ERROR => 'E',
        }
    }
}

/// Bounded buffer of recent log entries. Oldest entries are dropped first.
#[derive(Debug)]
pub struct LogStore {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        // a panic while holding the lock can't leave the deque inconsistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The oldest entry in `[from, to]` that matches `pred`.
    pub fn find_first(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        pred: impl Fn(&LogEntry) -> bool,
    ) -> Option<LogEntry> {
        self.lock()
            .iter()
            .find(|e| e.timestamp >= from && e.timestamp <= to && pred(e))
            .cloned()
    }

    /// All entries in `[from, to]` with the given trace id, oldest first.
    pub fn by_trace(&self, trace: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .filter(|e| e.trace.as_deref() == Some(trace))
            .cloned()
            .collect()
    }
}

/// Request identity stored in span extensions.
#[derive(Debug, Clone, Default)]
struct RequestIds {
    trace: Option<String>,
    path: Option<String>,
}

impl Visit for RequestIds {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            TRACE_ID_FIELD => self.trace = Some(value.to_string()),
            PATH_FIELD => self.path = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Formats an event as its message followed by `name=value` fields.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Tracing layer that records events into a [`LogStore`].
#[derive(Debug, Clone)]
pub struct LogCapture {
    store: Arc<LogStore>,
}

impl LogCapture {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for LogCapture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut ids = RequestIds::default();
        attrs.record(&mut ids);
        if ids.trace.is_none() && ids.path.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(ids);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let ids = ctx
            .event_scope(event)
            .and_then(|scope| {
                scope.from_root().find_map(|span| {
                    let extensions = span.extensions();
                    extensions.get::<RequestIds>().cloned()
                })
            })
            .unwrap_or_default();

        self.store.push(LogEntry {
            timestamp: Utc::now(),
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message + &visitor.fields,
            trace: ids.trace,
            path: ids.path,
        });
    }
}
