//! Fake identity service routes (local testing only).
//!
//! Serves the generated public key by `kid` and mints signed tokens for the
//! fake member and machine identities. The key store itself refuses to mint
//! unless the service listens on localhost, so mounting these routes in a
//! deployed service yields nothing but 400s.

use std::sync::Arc;

use axum::extract::Path;
use axum::response::Response;
use axum::routing::MethodFilter;

use siftd_core::ServiceError;
use siftd_security::{AuthModel, FakeKeyStore};

use crate::host::ServiceHost;
use crate::respond::{error_response, raw_ok};

/// Mount the token-mint and key routes gated by `auth_model`.
pub fn register_fake_identity_routes(
    host: &mut ServiceHost,
    auth_model: &AuthModel,
    key_store: Arc<FakeKeyStore>,
) {
    let user_store = Arc::clone(&key_store);
    host.register_route(
        MethodFilter::POST,
        "/v1/createFakeUserToken",
        auth_model,
        move || {
            let store = Arc::clone(&user_store);
            async move { create_fake_user_token(store).await }
        },
    );

    let machine_store = Arc::clone(&key_store);
    host.register_route(
        MethodFilter::POST,
        "/v1/createFakeMachineToken",
        auth_model,
        move || {
            let store = Arc::clone(&machine_store);
            async move { create_fake_machine_token(store).await }
        },
    );

    host.register_route(
        MethodFilter::GET,
        "/v1/keys/:kid",
        auth_model,
        move |Path(kid): Path<String>| {
            let store = Arc::clone(&key_store);
            async move { get_public_key(store, kid).await }
        },
    );
}

async fn create_fake_user_token(key_store: Arc<FakeKeyStore>) -> Response {
    tracing::info!("fake identity service - incoming request to create a fake user login token (for testing)");

    match key_store.mint_fake_user_token() {
        Ok(token) => raw_ok(token.into_bytes()),
        Err(err) => {
            tracing::info!(%err, "fake identity service - failed to create fake user token");
            error_response(&ServiceError::bad_request(err.to_string()))
        }
    }
}

async fn create_fake_machine_token(key_store: Arc<FakeKeyStore>) -> Response {
    tracing::info!("fake identity service - incoming request to create a fake machine token (for testing)");

    match key_store.mint_fake_machine_token() {
        Ok(token) => raw_ok(token.into_bytes()),
        Err(err) => {
            tracing::info!(%err, "fake identity service - failed to create fake machine token");
            error_response(&ServiceError::bad_request(err.to_string()))
        }
    }
}

async fn get_public_key(key_store: Arc<FakeKeyStore>, kid: String) -> Response {
    match key_store.get_public_key(&kid) {
        Ok(der) => raw_ok(der.to_vec()),
        Err(err) => {
            tracing::info!(%kid, %err, "fake identity service - failed to find public key");
            error_response(&ServiceError::bad_request(err.to_string()))
        }
    }
}
