// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! webutil
//!
//! Common plumbing for IndieWeb services:
//!
//! - HTTP client helpers with size limits, gateway errors and redirect caching
//! - URL canonicalization and URL, text, data and time utilities
//! - Webmention endpoint discovery and sending
//! - axum middleware: response caching, modern security headers, domain
//!   canonicalization, rate limiting, internal-only task routes
//! - A request log viewer backed by an in-process `tracing` layer
//! - Datastore model helpers

pub mod canonicalizer;
pub mod config;
pub mod error;
pub mod handlers;
pub mod html;
pub mod http;
pub mod interpret;
pub mod logs;
pub mod models;
pub mod util;
pub mod web;
pub mod webmention;

pub use config::{AppInfo, Config};
pub use error::{Error, Result};
pub use http::{HttpClient, RequestOptions};
