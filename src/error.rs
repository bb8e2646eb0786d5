//! Error taxonomy for HTTP-facing component boundaries.
//!
//! Each component owns its own error enum (see `store::StoreError`,
//! `wasm::WasmError`, `agent::AgentError`); this module holds the shared
//! `{error, message, code?}` shape those enums convert into at the HTTP
//! edge, plus the dispatcher's own validation error.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The generic message returned for any 5xx path. The real cause is only
/// ever logged, never sent to the caller.
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred";

/// A taxonomy kind from spec §7, used as the `error` field of the JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationFailed,
    NotFound,
    Conflict,
    RequestError,
    RequestTimeout,
    InternalServerError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RequestError => "request_error",
            ErrorKind::RequestTimeout => "request_timeout",
            ErrorKind::InternalServerError => "internal_server_error",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RequestError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A taxonomy error ready to be rendered as an HTTP response body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ValidationFailed,
            message: message.into(),
            code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
            code: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::RequestTimeout,
            message: message.into(),
            code: None,
        }
    }

    /// An internal failure. `cause` is logged with full detail; callers only
    /// ever see [`INTERNAL_ERROR_MESSAGE`].
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal server error");
        Self {
            kind: ErrorKind::InternalServerError,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            code: None,
        }
    }

    /// Same as [`ApiError::internal`] but surfaced under the `request_error`
    /// kind, matching S1 in spec §8 (auth failures upstream still render as
    /// `request_error` with the generic message once the status is ≥ 500).
    pub fn request_error_internal(cause: impl std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "request failed with internal cause");
        Self {
            kind: ErrorKind::RequestError,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
            code: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let body = ErrorBody {
            error: self.kind.as_str(),
            message: &self.message,
            code: self.code.as_deref(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_never_leaks_cause() {
        let err = ApiError::internal("postgres connection refused at 10.0.0.4:5432");
        assert_eq!(err.message, INTERNAL_ERROR_MESSAGE);
        assert_eq!(err.kind, ErrorKind::InternalServerError);
    }

    #[test]
    fn validation_keeps_message() {
        let err = ApiError::validation("model must start with 'agent/'");
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert!(err.message.contains("agent/"));
    }
}
