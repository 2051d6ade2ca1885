//! Security layer for siftd noun services.
//!
//! Three cooperating pieces:
//!
//! - [`AuthModel`]: an ordered set of realm-scoped policies that decides, per
//!   request, whether an RS256-signed JWT authenticates and authorizes the
//!   caller.
//! - [`KeyCache`]: a mutex-guarded, TTL-evicting cache of RSA verification
//!   keys fetched from the identity service by `kid`.
//! - [`FakeKeyStore`]: a test-mode stand-in for the identity service that
//!   generates a keypair at startup and mints signed tokens for fake
//!   identities. Refuses to mint unless the service listens on localhost.
//!
//! The wire contract: the `Authorization` header carries the raw compact JWT
//! directly — no `Bearer ` prefix. On acceptance the gate propagates the
//! caller as an [`AuthIdentity`], also rendered into the `X-AuthToken`
//! request header as `"<sub>:<impersonatedBy or empty>"` for downstream
//! consumers that only see headers.

/// Per-request authentication/authorization pipeline.
pub mod auth_model;
/// JWT claims model and the propagated caller identity.
pub mod claims;
/// Test-mode identity service stand-in.
pub mod fake_key_store;
/// TTL-evicting RSA public-key cache.
pub mod key_cache;
/// Realm-scoped policies and their validity rules.
pub mod policy;
/// Caller realms (the `sub_type` claim).
pub mod realm;

pub use auth_model::{AuthError, AuthModel};
pub use claims::{AuthIdentity, Claims, AUTH_TOKEN_HEADER};
pub use fake_key_store::{
    FakeKeyStore, FakeKeyStoreError, FAKE_MEMBER_IDENTITY, FAKE_SERVICE_IDENTITY, TOKEN_ISSUER,
};
pub use key_cache::{KeyCache, KeyCacheError, PUBLIC_KEY_TTL};
pub use policy::{AuthPolicy, AuthRule, AuthTimeout, PolicyError};
pub use realm::Realm;
