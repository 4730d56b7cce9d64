// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Full router tests: handlers plus middleware.

mod harness;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Router;
use harness::FixtureServer;
use std::sync::Arc;
use tower::ServiceExt;
use webutil::config::{AppInfo, Config, DomainConfig, RateLimitConfig};
use webutil::handlers::{router, AppState};
use webutil::logs::LogStore;

fn state(config: Config) -> AppState {
    AppState::new(config, &AppInfo::default(), Arc::new(LogStore::new(100))).unwrap()
}

async fn call(app: &Router, request: Request) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_discover_is_cached() {
    let server = FixtureServer::start().await;
    let state = state(Config::default());
    let app = router(state.clone(), &AppInfo::default());

    let uri = format!(
        "/webmention/discover?url={}",
        urlencoding::encode(&server.url("/html-link"))
    );
    for _ in 0..2 {
        let response = call(&app, get(&uri)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["endpoint"], server.url("/endpoint"));
    }
    assert_eq!(state.metrics.cache_misses.get(), 1);
    assert_eq!(state.metrics.cache_hits.get(), 1);
}

#[tokio::test]
async fn test_send() {
    let server = FixtureServer::start().await;
    let app = router(state(Config::default()), &AppInfo::default());
    let target = server.url("/html-link");

    let form = format!(
        "source={}&target={}",
        urlencoding::encode("http://source.example/post"),
        urlencoding::encode(&target)
    );
    let response = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/webmention/send")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["endpoint"], server.url("/endpoint"));
    assert_eq!(json["status"], 202);

    assert_eq!(
        server.received(),
        vec![vec![
            ("source".to_string(), "http://source.example/post".to_string()),
            ("target".to_string(), target),
        ]]
    );
}

#[tokio::test]
async fn test_send_without_endpoint() {
    let server = FixtureServer::start().await;
    let app = router(state(Config::default()), &AppInfo::default());
    let target = server.url("/none");

    let uri = format!(
        "/webmention/send?source=http://source.example/&target={}",
        urlencoding::encode(&target)
    );
    let response = call(
        &app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_text(response).await,
        format!("No webmention endpoint found for {target}")
    );
}

#[tokio::test]
async fn test_canonical_domain() {
    let config = Config {
        domains: DomainConfig {
            from: vec!["old.example".to_string()],
            to: Some("new.example".to_string()),
        },
        ..Default::default()
    };
    let app = router(state(config), &AppInfo::default());

    let response = call(
        &app,
        Request::builder()
            .uri("/health?x=y")
            .header(header::HOST, "old.example")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "http://new.example/health?x=y");
    // modern headers apply to redirects too
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let response = call(
        &app,
        Request::builder()
            .uri("/health")
            .header(header::HOST, "new.example")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit() {
    let config = Config {
        rate_limit: RateLimitConfig {
            max_rate_rpm: 2,
            burst_threshold_multiplier: 100.0,
            trust_forwarded_for: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let app = router(state(config), &AppInfo::default());

    let request = |ip: &str| {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    };

    for remaining in ["1", "0"] {
        let response = call(&app, request("10.0.0.1")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let response = call(&app, request("10.0.0.1")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(body_text(response).await, "Rate limit exceeded");

    let response = call(&app, request("10.0.0.2")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_host_meta_and_info() {
    let app = router(state(Config::default()), &AppInfo::default());

    let response = call(&app, get("/.well-known/host-meta?format=xrd")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/xrd+xml; charset=utf-8"
    );
    assert!(body_text(response).await.contains("<Link rel='lrdd'"));

    let response = call(&app, get("/_info")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("<h2>Current requests</h2>"));
}
