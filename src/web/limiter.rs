// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-client token bucket rate limiting.
//!
//! Clients are keyed by peer address. Behind a proxy, with
//! `trust_forwarded_for` set, the first `X-Forwarded-For` address is used
//! instead. A client that sends far more than its rate within ten
//! seconds is locked out for the configured cooldown.

use crate::config::RateLimitConfig;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BURST_WINDOW: Duration = Duration::from_secs(10);

/// Clients untouched for this long are forgotten by [`RateLimiter::cleanup`].
const IDLE_AFTER: Duration = Duration::from_secs(300);

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allow {
        /// Whole tokens left after this request
        remaining: u32,
    },
    Deny {
        reason: DenyReason,
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    TooFast,
    Cooldown,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TooFast => "Rate limit exceeded",
            Self::Cooldown => "Burst detected, in cooldown",
        })
    }
}

#[derive(Debug)]
struct ClientState {
    tokens: f64,
    refilled_at: Instant,
    /// Accepted requests inside the burst window, oldest first
    recent: VecDeque<Instant>,
    locked_until: Option<Instant>,
}

impl ClientState {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            refilled_at: now,
            recent: VecDeque::new(),
            locked_until: None,
        }
    }

    fn forget_before(&mut self, cutoff: Instant) {
        while self.recent.front().is_some_and(|t| *t < cutoff) {
            self.recent.pop_front();
        }
    }
}

/// Rate limiter keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, ClientState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.max_rate_rpm)
    }

    fn per_second(&self) -> f64 {
        self.capacity() / 60.0
    }

    /// Accepted requests allowed inside the burst window before cooldown:
    /// the multiplier times a sixth of the per-minute rate, at least 3.
    fn burst_limit(&self) -> usize {
        let expected = (self.capacity() / 6.0).max(1.0);
        (expected * f64::from(self.config.burst_threshold_multiplier)).max(3.0) as usize
    }

    /// Counts a request from `client` and decides whether to serve it.
    pub fn check(&self, client: &str) -> Decision {
        let now = Instant::now();
        let capacity = self.capacity();
        let mut state = self
            .clients
            .entry(client.to_string())
            .or_insert_with(|| ClientState::full(capacity, now));

        if let Some(until) = state.locked_until {
            if now < until {
                let retry_after = until - now;
                debug!(client, ?retry_after, "Client in cooldown");
                return Decision::Deny {
                    reason: DenyReason::Cooldown,
                    retry_after,
                };
            }
            state.locked_until = None;
        }

        if let Some(cutoff) = now.checked_sub(BURST_WINDOW) {
            state.forget_before(cutoff);
        }
        if state.recent.len() > self.burst_limit() {
            let cooldown = self.config.cooldown_duration();
            warn!(client, ?cooldown, "Burst detected, applying cooldown");
            state.locked_until = Some(now + cooldown);
            return Decision::Deny {
                reason: DenyReason::Cooldown,
                retry_after: cooldown,
            };
        }

        let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.per_second()).min(capacity);
        state.refilled_at = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.recent.push_back(now);
            return Decision::Allow {
                remaining: state.tokens.floor() as u32,
            };
        }

        let retry_after = if self.per_second() > 0.0 {
            Duration::from_secs_f64((1.0 - state.tokens) / self.per_second())
        } else {
            self.config.window_duration()
        };
        debug!(client, ?retry_after, "Rate limit exceeded");
        Decision::Deny {
            reason: DenyReason::TooFast,
            retry_after,
        }
    }

    /// Forgets idle clients that aren't in cooldown. Call periodically.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.clients.retain(|_, state| {
            state.locked_until.is_some_and(|until| now < until)
                || now.duration_since(state.refilled_at) < IDLE_AFTER
        });
    }
}

/// Identifies the client: the peer address, or with `trust_forwarded_for`
/// the first `X-Forwarded-For` address when there is one.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').map(str::trim).find(|v| !v.is_empty()));

    match (forwarded, peer) {
        (Some(addr), _) => addr.to_string(),
        (None, Some(peer)) => peer.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Middleware that answers 429 with `Retry-After` for limited clients and
/// adds `X-RateLimit-Remaining` to everything else.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.config.enabled {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_key(request.headers(), peer, limiter.config.trust_forwarded_for);

    match limiter.check(&client) {
        Decision::Allow { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            response
        }
        Decision::Deny {
            reason,
            retry_after,
        } => {
            // whole seconds, rounded up
            let secs = retry_after.as_secs_f64().ceil() as u64;
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, secs.to_string())],
                reason.to_string(),
            )
                .into_response()
        }
    }
}
