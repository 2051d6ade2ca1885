//! Semantic error model.
//!
//! Every layer of a noun service reports failures through [`ServiceError`].
//! The variants are semantic kinds, not transport codes; the service layer
//! owns the mapping onto HTTP status codes. Infrastructure detail (driver
//! messages, connection strings) never travels inside a variant — it is
//! logged where it happens and collapsed to [`ServiceError::Internal`].

use thiserror::Error;

/// The only message a caller ever sees for an internal failure.
///
/// Raw database / driver errors are logged at `error` level where they occur
/// and must not leak to clients.
pub const INTERNAL_SERVER_ERROR: &str =
    "a backend system error occurred - please check the service logs";

/// Result type used across the service layers.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Semantic failure kinds shared by the store, security, and service layers.
///
/// Errors are `Clone` and `PartialEq` so tests can compare them directly and
/// callers can hold them across task boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The requested resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The request is malformed or fails a precondition (including an
    /// optimistic-concurrency version mismatch, which is indistinguishable
    /// from a nonexistent resource at the store boundary).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A unique-key conflict occurred on create or update.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// Authentication failed (bad or expired signature, missing claims).
    #[error("unauthorized")]
    Unauthorized,

    /// The caller is authenticated but no policy authorizes the request.
    #[error("forbidden")]
    Forbidden,

    /// Anything else. The underlying cause has been logged; the message
    /// presented to callers is deliberately generic (see
    /// [`INTERNAL_SERVER_ERROR`]).
    #[error("a backend system error occurred - please check the service logs")]
    Internal,
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_message_is_redacted() {
        let err = ServiceError::Internal;
        assert_eq!(err.to_string(), INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn variant_messages_carry_context() {
        assert!(ServiceError::not_found("abc").to_string().contains("abc"));
        assert!(ServiceError::bad_request("owner mismatch")
            .to_string()
            .contains("owner mismatch"));
        assert!(ServiceError::already_exists("id-1").to_string().contains("id-1"));
    }
}
