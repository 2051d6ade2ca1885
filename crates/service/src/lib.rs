//! Service host for siftd noun services.
//!
//! [`ServiceHost`] wires configuration, logging, the shared key cache, the
//! router, and the process lifecycle (listen, signal-driven graceful
//! shutdown). Routes are registered pre-gated by an
//! [`AuthModel`](siftd_security::AuthModel); no request reaches a handler
//! without passing the gate.
//!
//! The `routes` module carries the default routers every noun service tends
//! to mount: health, journal tailing, and the fake identity service for
//! local testing.

/// Auth gate middleware wrapping every registered route.
pub mod gate;
/// Service host and lifecycle.
pub mod host;
/// HTTP response helpers and the error-to-status mapping.
pub mod respond;
/// Default routers: health, journal, fake identity.
pub mod routes;

pub use host::{HostError, ServiceHost};
pub use respond::{error_response, json_ok, raw_ok};
pub use routes::fake_identity::register_fake_identity_routes;
pub use routes::health::register_health_routes;
pub use routes::journal::register_journal_routes;
