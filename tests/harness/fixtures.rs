// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixture pages served from `127.0.0.1` on a random port.
//!
//! | path                  | serves                                          |
//! |-----------------------|-------------------------------------------------|
//! | `/link-header`        | endpoint in a relative `Link` header            |
//! | `/html-link`          | endpoint in a `<link rel="webmention">` tag     |
//! | `/a-tag`              | endpoint in an `<a rel="webmention">` with #frag|
//! | `/refresh`            | meta refresh to `/html-link`                    |
//! | `/none`               | HTML with no endpoint                           |
//! | `/image`              | PNG, no endpoint                                |
//! | `/redirect`           | 302 to `/html-link`                             |
//! | `/endpoint`           | POST, records the form, 202                     |
//! | `/endpoint-fail`      | POST, 400                                       |
//! | `/post-redirect`      | POST, 307 to `/endpoint`                        |
//! | `/big`                | 100 bytes of text                               |
//! | `/status/:code`       | that status                                     |
//! | `/backlink`           | page linking to `http://target.example/`        |

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use webutil::web::Params;

/// Forms POSTed to `/endpoint`.
pub type Received = Arc<Mutex<Vec<Vec<(String, String)>>>>;

/// A running fixture server. Stopped on drop.
pub struct FixtureServer {
    pub addr: SocketAddr,
    pub received: Received,
    handle: JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let received: Received = Arc::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = router(received.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            received,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn received(&self) -> Vec<Vec<(String, String)>> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn html(body: &str) -> Html<String> {
    Html(format!("<html>\n<head></head>\n<body>\n{body}\n</body>\n</html>"))
}

fn router(received: Received) -> Router {
    Router::new()
        .route(
            "/link-header",
            get(|| async {
                (
                    [(header::LINK, r#"</endpoint>; rel="webmention""#)],
                    html("no tags here"),
                )
            }),
        )
        .route(
            "/html-link",
            get(|| async { html(r#"<link rel="webmention" href="/endpoint">"#) }),
        )
        .route(
            "/a-tag",
            get(|| async { html(r#"<a rel="nofollow webmention" href="endpoint#frag">mention</a>"#) }),
        )
        .route(
            "/refresh",
            get(|| async { html(r#"<meta http-equiv="refresh" content="0; URL='/html-link'">"#) }),
        )
        .route("/none", get(|| async { html("<p>nothing</p>") }))
        .route(
            "/image",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0u8; 8]) }),
        )
        .route("/redirect", get(|| async { Redirect::to("/html-link") }))
        .route("/endpoint", post(endpoint))
        .route(
            "/endpoint-fail",
            post(|| async { (StatusCode::BAD_REQUEST, "nope") }),
        )
        .route(
            "/post-redirect",
            post(|| async { Redirect::temporary("/endpoint") }),
        )
        .route(
            "/big",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "x".repeat(100)) }),
        )
        .route("/status/:code", get(status))
        .route(
            "/backlink",
            get(|| async {
                html(r#"<a href="http://target.example/">target</a> <div id="reply">hi</div>"#)
            }),
        )
        .with_state(received)
}

async fn endpoint(State(received): State<Received>, params: Params) -> Response {
    let form = params
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    received.lock().unwrap().push(form);
    (StatusCode::ACCEPTED, "queued").into_response()
}

async fn status(Path(code): Path<u16>) -> Response {
    StatusCode::from_u16(code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        .into_response()
}
