//! Standard health route.
//!
//! `GET /v1/health` reports the overall status, the database dependency
//! probed through the store, and the services this instance calls (from
//! `CALLED_SERVICES` configuration).

use std::sync::Arc;

use axum::response::Response;
use axum::routing::MethodFilter;

use siftd_core::health::DEPENDENCY_DATABASE;
use siftd_core::HealthStatus;
use siftd_security::AuthModel;
use siftd_store::JournalStore;

use crate::host::ServiceHost;
use crate::respond::json_ok;

/// Mount `GET /v1/health` gated by `auth_model`.
pub fn register_health_routes(
    host: &mut ServiceHost,
    auth_model: &AuthModel,
    store: Arc<dyn JournalStore>,
) {
    let called_services = host.config().called_services.clone();

    host.register_route(MethodFilter::GET, "/v1/health", auth_model, move || {
        let store = Arc::clone(&store);
        let called_services = called_services.clone();
        async move { get_health(store, called_services).await }
    });
}

async fn get_health(store: Arc<dyn JournalStore>, called_services: Vec<String>) -> Response {
    let mut health = HealthStatus::healthy(called_services);

    match store.health_check().await {
        Ok(()) => health.record_dependency(DEPENDENCY_DATABASE, true),
        Err(err) => {
            tracing::info!(%err, "health route - database probe failed");
            health.record_dependency(DEPENDENCY_DATABASE, false);
        }
    }

    json_ok(&health)
}
