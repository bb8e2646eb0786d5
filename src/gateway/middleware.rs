//! Timeout/Recovery Middleware (C8), grounded on
//! `orchestrator::auth::worker_auth_middleware`'s `from_fn_with_state`
//! shape. Racing the handler future against a deadline and against panic
//! capture, rather than a literal `WriteHeader` flag — axum's body model
//! resolves the handler future before bytes go out, so "the future
//! resolved" stands in for "headers committed" here.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;

use crate::error::ApiError;

#[derive(Clone, Copy)]
pub struct RequestTimeout(pub Duration);

pub async fn timeout_and_recover(
    State(timeout): State<RequestTimeout>,
    req: Request,
    next: Next,
) -> Response {
    let handler = AssertUnwindSafe(next.run(req)).catch_unwind();

    match tokio::time::timeout(timeout.0, handler).await {
        Ok(Ok(response)) => response,
        Ok(Err(panic)) => {
            let cause = panic_message(&panic);
            ApiError::internal(cause).into_response()
        }
        Err(_elapsed) => ApiError::timeout("request exceeded the configured timeout").into_response(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    async fn slow_handler() -> &'static str {
        tokio::time::sleep(Duration::from_millis(50)).await;
        "ok"
    }

    async fn panicking_handler() -> &'static str {
        panic!("boom");
    }

    fn router(timeout: Duration) -> Router {
        Router::new()
            .route("/slow", get(slow_handler))
            .route("/panic", get(panicking_handler))
            .layer(axum::middleware::from_fn_with_state(
                RequestTimeout(timeout),
                timeout_and_recover,
            ))
    }

    #[tokio::test]
    async fn request_within_deadline_succeeds() {
        let app = router(Duration::from_millis(500));
        let resp = app
            .oneshot(HttpRequest::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn request_past_deadline_times_out() {
        let app = router(Duration::from_millis(5));
        let resp = app
            .oneshot(HttpRequest::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn panicking_handler_is_captured_as_internal_error() {
        let app = router(Duration::from_secs(5));
        let resp = app
            .oneshot(HttpRequest::builder().uri("/panic").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
