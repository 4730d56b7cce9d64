// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Restricts routes to task queue and cron requests.

use crate::web::errors::HttpError;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;

pub const TASK_NAME_HEADER: &str = "x-appengine-taskname";
pub const CRON_HEADER: &str = "x-appengine-cron";

/// When to log the task name of incoming task requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskLogging {
    #[default]
    Always,
    Never,
    /// Only when the request has no `traceparent`, i.e. its logs won't be
    /// grouped under the enqueuing request.
    UnlessTraced,
}

impl TaskLogging {
    fn should_log(self, headers: &HeaderMap) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::UnlessTraced => !headers.contains_key("traceparent"),
        }
    }
}

/// Middleware that returns 401 unless the request came from a task queue or
/// cron.
pub async fn cloud_tasks_only(
    State(logging): State<TaskLogging>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let task = headers
        .get(TASK_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if task.is_none() && !headers.contains_key(CRON_HEADER) {
        return HttpError::unauthorized("Internal only").into_response();
    }

    if logging.should_log(headers) {
        info!("Task {}", task.as_deref().unwrap_or_default());
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    fn app(logging: TaskLogging) -> Router {
        Router::new()
            .route("/task", post(|| async { "done" }))
            .layer(middleware::from_fn_with_state(logging, cloud_tasks_only))
    }

    #[tokio::test]
    async fn test_rejects_external() {
        let response = app(TaskLogging::Always)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/task")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Internal only");
    }

    #[tokio::test]
    async fn test_allows_tasks_and_cron() {
        for (name, value, logging) in [
            (TASK_NAME_HEADER, "my-task", TaskLogging::Always),
            (CRON_HEADER, "true", TaskLogging::Never),
            (TASK_NAME_HEADER, "other", TaskLogging::UnlessTraced),
        ] {
            let response = app(logging)
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/task")
                        .header(name, value)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_should_log() {
        let mut headers = HeaderMap::new();
        assert!(TaskLogging::UnlessTraced.should_log(&headers));
        headers.insert("traceparent", "00-abc-def-01".parse().unwrap());
        assert!(!TaskLogging::UnlessTraced.should_log(&headers));
        assert!(TaskLogging::Always.should_log(&headers));
        assert!(!TaskLogging::Never.should_log(&headers));
    }
}
