//! HTTP response helpers.
//!
//! Success bodies are JSON of the documented shape. Error bodies are either
//! empty (auth rejects) or a short message string. `Content-Type` is always
//! `application/json`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use siftd_core::ServiceError;

const CONTENT_TYPE_JSON: (header::HeaderName, &str) = (header::CONTENT_TYPE, "application/json");

/// Map a semantic error onto its HTTP shape.
///
/// Auth rejects carry an empty body so rejections leak nothing; everything
/// else carries the error's short message.
pub fn error_response(err: &ServiceError) -> Response {
    let status = match err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::AlreadyExists(_) => StatusCode::CONFLICT,
        ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
        ServiceError::Forbidden => StatusCode::FORBIDDEN,
        ServiceError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match err {
        ServiceError::Unauthorized | ServiceError::Forbidden => String::new(),
        other => other.to_string(),
    };

    (status, [CONTENT_TYPE_JSON], body).into_response()
}

/// 200 with a JSON-serialized body.
pub fn json_ok<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(bytes) => (StatusCode::OK, [CONTENT_TYPE_JSON], bytes).into_response(),
        Err(err) => {
            tracing::error!(%err, "failed to serialize response body");
            error_response(&ServiceError::Internal)
        }
    }
}

/// 200 with pre-rendered bytes (token and key routes).
pub fn raw_ok(bytes: Vec<u8>) -> Response {
    (StatusCode::OK, [CONTENT_TYPE_JSON], bytes).into_response()
}
