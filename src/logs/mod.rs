// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request log capture, rendering and links to the log viewer.

pub mod capture;
pub mod view;

pub use capture::{LogCapture, LogEntry, LogStore};
pub use view::{log, LogViewer};

use crate::error::{Error, Result};
use crate::models::{Key, KeyId};
use crate::util::time::naturaltime;
use crate::util::urls::urlencode;
use chrono::{DateTime, Duration, Timelike, Utc};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Logs older than this many days aren't linked.
pub const MAX_LOG_AGE_DAYS: i64 = 30;

/// 2008-04-01, roughly App Engine's launch.
pub const MIN_START_TIME: f64 = 1_207_008_000.0;
/// 2099-01-01
pub const MAX_START_TIME: f64 = 4_070_908_800.0;

static SANITIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?i)((?:access|api|oauth)?[ _]?"#,
        r#"(?:code|accessJwt|consumer_key|consumer_secret|nonce|password|refreshJwt|secret|signature|token|verifier)"#,
        r#"(?:u?['"])?"#,
        r#"(?:=|:| |, |%3D) *"#,
        r#"(?:u?['"])?)"#,
        r#"[^ &='"]+"#,
    ))
    .expect("valid sanitize regex")
});

// URL-safe base64 keys of 32 or more characters
static DATASTORE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^A-Za-z0-9\-_=])(([A-Za-z0-9\-_=]{8})[A-Za-z0-9\-_=]{24,})([^A-Za-z0-9\-_=])")
        .expect("valid datastore key regex")
});

/// Masks access tokens, secrets, passwords and similar values.
pub fn sanitize(msg: &str) -> String {
    SANITIZE_RE.replace_all(msg, "${1}...").into_owned()
}

/// Optional filters for log viewer links.
#[derive(Debug, Clone, Default)]
pub struct LogParams {
    pub module: Option<String>,
    pub path: Vec<String>,
}

/// Relative URL of the log viewer page for a request, e.g.
/// `log?start_time=172800&key=...`.
///
/// Paths can't contain commas, since they're joined with them.
pub fn log_url(when: &DateTime<Utc>, key: &str, params: &LogParams) -> Result<String> {
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(module) = &params.module {
        query.push(("module", module.clone()));
    }
    if !params.path.is_empty() {
        if let Some(bad) = params.path.iter().find(|p| p.contains(',')) {
            return Err(Error::InvalidValue(format!("log path can't contain a comma: {bad}")));
        }
        query.push(("path", params.path.join(",")));
    }
    query.push(("start_time", when.timestamp().to_string()));
    query.push(("key", key.to_string()));

    Ok(format!("log?{}", urlencode(&query)))
}

/// CSS classes for [`maybe_link`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub time_class: String,
    pub link_class: String,
    pub params: LogParams,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            time_class: "dt-updated".to_string(),
            link_class: String::new(),
            params: LogParams::default(),
        }
    }
}

fn isoformat(when: &DateTime<Utc>) -> String {
    if when.nanosecond() / 1000 == 0 {
        when.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
    } else {
        when.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
    }
}

/// Renders a `<time>` tag for a timestamp, linked to its logs if it's
/// between `now` and [`MAX_LOG_AGE_DAYS`] ago.
pub fn maybe_link(
    when: &DateTime<Utc>,
    key: &str,
    opts: &LinkOptions,
    now: &DateTime<Utc>,
) -> Result<String> {
    maybe_link_within(when, key, opts, now, Duration::days(MAX_LOG_AGE_DAYS))
}

fn maybe_link_within(
    when: &DateTime<Utc>,
    key: &str,
    opts: &LinkOptions,
    now: &DateTime<Utc>,
    max_age: Duration,
) -> Result<String> {
    let time = format!(
        r#"<time class="{}" datetime="{}" title="{} UTC">{}</time>"#,
        opts.time_class,
        isoformat(when),
        when.format("%a %b %e %H:%M:%S %Y"),
        naturaltime(when, now),
    );

    if now > when && *when > *now - max_age {
        let url = log_url(when, key, &opts.params)?;
        return Ok(format!(r#"<a class="{}" href="/{url}">{time}</a>"#, opts.link_class));
    }
    Ok(time)
}

/// Datastore console path for a key, `0/|4/Kind|7/name:id|...`, quoted twice.
fn console_key(key: &Key) -> String {
    let tokens: Vec<String> = key
        .pairs()
        .iter()
        .map(|(kind, id)| {
            let id = match id {
                KeyId::Int(id) => format!("id:{id}"),
                KeyId::Name(name) => format!("name:{name}"),
            };
            format!("{}/{kind}|{}/{id}", kind.chars().count(), id.chars().count())
        })
        .collect();
    let path = format!("0/|{}", tokens.join("|"));
    urlencoding::encode(&urlencoding::encode(&path)).into_owned()
}

/// Links datastore keys in a log message to the datastore console.
pub fn linkify_datastore_keys(msg: &str, app_id: &str) -> String {
    DATASTORE_KEY_RE
        .replace_all(msg, |caps: &Captures| {
            let Ok(key) = Key::from_urlsafe(&caps[2]) else {
                return caps[0].to_string();
            };
            format!(
                "{}<a title='{}' href='https://console.cloud.google.com/datastore/entities;kind={};ns=__$DEFAULT$__/edit;key={}?project={app_id}'>{}...</a>{}",
                &caps[1],
                &caps[2],
                key.kind(),
                console_key(&key),
                &caps[3],
                &caps[4],
            )
        })
        .into_owned()
}
