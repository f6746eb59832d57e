//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::{StorageError, WagerError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error payload. `message` is the human-readable rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub code: String,
    pub message: String,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    /// Wager rejected for a caller-side reason
    Rejected { code: &'static str, message: String },
    InternalError(String),
}

impl ApiError {
    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message),
            request_id,
        }
    }

    pub fn from_wager(request_id: String, error: WagerError) -> Self {
        let kind = if error.is_user_error() {
            ApiErrorKind::Rejected {
                code: error.code(),
                message: error.to_string(),
            }
        } else {
            tracing::error!(request_id = %request_id, "Wager placement failed: {}", error);
            ApiErrorKind::InternalError("Error placing wager".to_string())
        };
        Self { kind, request_id }
    }

    pub fn from_storage(request_id: String, error: StorageError) -> Self {
        tracing::error!(request_id = %request_id, "Storage failure: {}", error);
        Self::internal_error(request_id, "Storage unavailable".to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::Unauthorized(msg) => write!(f, "[{}] Unauthorized: {}", self.request_id, msg),
            ApiErrorKind::Rejected { code, message } => {
                write!(f, "[{}] Rejected ({}): {}", self.request_id, code, message)
            }
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiErrorKind::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiErrorKind::Rejected { code, message } => (StatusCode::BAD_REQUEST, code, message),
            ApiErrorKind::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            code: code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
