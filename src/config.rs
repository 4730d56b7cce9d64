// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for webutil services.
//!
//! Values come from serde defaults, overridden by `WEBUTIL__*` environment
//! variables (loaded from `.env` first when present). Nested keys use `__`,
//! e.g. `WEBUTIL__HTTP__TIMEOUT_SECS=30`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Outbound HTTP client configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Domain canonicalization configuration
    #[serde(default)]
    pub domains: DomainConfig,

    /// Request log capture configuration
    #[serde(default)]
    pub logs: LogsConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Base64-encoded 32 byte key for encrypted model properties
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds (default: 15)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Max size of text/* and application/* bodies in bytes (default: 2MB)
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,

    /// Max redirects followed by POSTs (default: 30)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// How long follow_redirects results are cached, in seconds (default: 1 day)
    #[serde(default = "default_redirect_cache_ttl_secs")]
    pub redirect_cache_ttl_secs: u64,

    /// Max number of follow_redirects results cached (default: 1000)
    #[serde(default = "default_redirect_cache_size")]
    pub redirect_cache_size: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable the rate limiting middleware (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum requests per minute per client (default: 60)
    #[serde(default = "default_max_rate_rpm")]
    pub max_rate_rpm: u32,

    /// Cooldown period after burst detection in milliseconds (default: 30000)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_on_burst_ms: u64,

    /// Burst threshold multiplier (default: 3x normal rate in 10s window)
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold_multiplier: f32,

    /// Time window for rate calculation in seconds (default: 60)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Key clients on the first `X-Forwarded-For` address instead of the
    /// peer. Only safe behind a proxy that sets the header (default: false)
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache lifetime in seconds (default: 300)
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Request headers whose values are part of the cache key
    #[serde(default)]
    pub headers: Vec<String>,

    /// Whether 5xx responses are cached too (default: false)
    #[serde(default)]
    pub cache_5xx: bool,

    /// Max stored responses. The oldest is evicted when full (default: 500)
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// Domain canonicalization: requests for `from` hosts redirect to `to`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub from: Vec<String>,

    #[serde(default)]
    pub to: Option<String>,
}

/// Request log capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Max entries held in memory (default: 10000)
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_user_agent() -> String {
    "webutil (https://github.com/hyperpolymath/indieweb2-bastion)".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_response_size() -> usize {
    2_000_000
}

fn default_max_redirects() -> usize {
    30
}

fn default_redirect_cache_ttl_secs() -> u64 {
    60 * 60 * 24
}

fn default_redirect_cache_size() -> usize {
    1000
}

fn default_max_rate_rpm() -> u32 {
    60
}

fn default_cooldown_ms() -> u64 {
    30000
}

fn default_burst_threshold() -> f32 {
    3.0
}

fn default_window_secs() -> u64 {
    60
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    500
}

fn default_log_capacity() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http: HttpConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            domains: DomainConfig::default(),
            logs: LogsConfig::default(),
            metrics: MetricsConfig::default(),
            encryption_key: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_response_size: default_max_response_size(),
            max_redirects: default_max_redirects(),
            redirect_cache_ttl_secs: default_redirect_cache_ttl_secs(),
            redirect_cache_size: default_redirect_cache_size(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_rate_rpm: default_max_rate_rpm(),
            cooldown_on_burst_ms: default_cooldown_ms(),
            burst_threshold_multiplier: default_burst_threshold(),
            window_secs: default_window_secs(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            headers: Vec::new(),
            cache_5xx: false,
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load configuration from `.env` and `WEBUTIL__*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("WEBUTIL")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("domains.from")
                    .with_list_parse_key("cache.headers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl HttpConfig {
    /// Get the request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the follow_redirects cache lifetime
    pub fn redirect_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.redirect_cache_ttl_secs)
    }
}

impl RateLimitConfig {
    /// Get the cooldown duration
    pub fn cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.cooldown_on_burst_ms)
    }

    /// Get the rate window duration
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Information about the hosting environment.
///
/// Detected from the standard App Engine and Cloud Run variables:
/// `GOOGLE_CLOUD_PROJECT` or `GAE_APPLICATION` name the project, and a
/// server is local when neither `GAE_ENV` is `standard` nor `GAE_INSTANCE`
/// is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub project: Option<String>,
    pub app_id: Option<String>,
    pub creds: Option<String>,
    pub debug: bool,
    pub local_server: bool,
}

impl AppInfo {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let project = var("GOOGLE_CLOUD_PROJECT").or_else(|| var("GAE_APPLICATION"));
        let app_id = project
            .as_deref()
            .map(|p| p.rsplit('~').next().unwrap_or(p).to_string());

        let creds = var("GOOGLE_APPLICATION_CREDENTIALS");
        let debug = creds.is_some()
            || !(var("GAE_ENV").as_deref() == Some("standard") || var("GAE_INSTANCE").is_some());
        let local_server = debug && creds.is_none();

        Self {
            project,
            app_id,
            creds,
            debug,
            local_server,
        }
    }
}
