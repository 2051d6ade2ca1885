//! Auth gate middleware.
//!
//! Installed per-route by
//! [`ServiceHost::register_route`](crate::host::ServiceHost::register_route).
//! The gate runs the model's full pipeline; on acceptance it threads the
//! typed [`AuthIdentity`](siftd_security::AuthIdentity) through
//! request extensions and stamps the `X-AuthToken` header for downstream
//! consumers that only see headers. On rejection the wrapped handler is never
//! invoked and the response is the bare status with an empty JSON body.

use std::sync::Arc;

use axum::extract::{RawPathParams, Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use siftd_security::{AuthError, AuthModel, AUTH_TOKEN_HEADER};

/// Path variable consulted by `MatchingIdentity` policies.
const IDENTITY_PATH_VAR: &str = "identityId";

pub async fn auth_gate(
    State(model): State<Arc<AuthModel>>,
    params: RawPathParams,
    mut req: Request,
    next: Next,
) -> Response {
    if model.is_no_auth() {
        return next.run(req).await;
    }

    // The Authorization header carries the compact JWT verbatim; there is no
    // `Bearer ` scheme prefix on this wire.
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let url_identity = params
        .iter()
        .find(|(name, _)| *name == IDENTITY_PATH_VAR)
        .map(|(_, value)| value);

    match model.authorize(authorization, url_identity).await {
        Ok(identity) => {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(AUTH_TOKEN_HEADER.as_bytes()),
                HeaderValue::from_str(&identity.header_value()),
            ) {
                req.headers_mut().insert(name, value);
            }
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(AuthError::Unauthorized) => reject(StatusCode::UNAUTHORIZED),
        Err(AuthError::Forbidden) => reject(StatusCode::FORBIDDEN),
    }
}

/// Status code, `application/json`, zero-length body.
fn reject(status: StatusCode) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], "").into_response()
}
