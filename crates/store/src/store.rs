//! Store traits shared by the backends.

use async_trait::async_trait;

use siftd_core::{ServiceError, ServiceResult};
use siftd_security::AuthIdentity;

use crate::resource::{JournalEntry, Resource, ResourceBase};

/// The journal-facing half of a store: health probe plus the change tail.
///
/// Split from [`ResourceStore`] so the standard health and journal routes can
/// work against any resource shape without knowing it.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Trivial database probe. Failures are logged in detail and surfaced as
    /// a redacted internal error.
    async fn health_check(&self) -> ServiceResult<()>;

    /// Up to `limit` entries with `clock >= clock`, ascending.
    ///
    /// The lower bound is inclusive on purpose: a consumer holding a clock
    /// value can re-fetch exactly that entry with `limit = 1`.
    async fn journal_changes(&self, clock: u64, limit: u64) -> ServiceResult<Vec<JournalEntry>>;

    /// The maximum clock across all entries, or 0 when the journal is empty.
    async fn journal_max_clock(&self) -> ServiceResult<u64>;
}

/// Versioned CRUD over a resource table plus the atomic journal append.
#[async_trait]
pub trait ResourceStore<R: Resource>: JournalStore {
    /// Load by id. Soft-deleted rows ARE returned so audit-aware callers can
    /// distinguish tombstones. The owner id is accepted for access control
    /// but the canonical lookup is by id.
    async fn get_by_id(&self, id: &str, owner_id: &str) -> ServiceResult<R>;

    /// All non-deleted resources for an owner. An empty list is success.
    async fn get_by_owner_id(&self, owner_id: &str) -> ServiceResult<Vec<R>>;

    /// Insert the resource row and its journal entry in one atomic step.
    /// A unique-key conflict maps to [`ServiceError::AlreadyExists`].
    async fn create_resource(&self, resource: R, identity: &AuthIdentity) -> ServiceResult<R>;

    /// Conditionally update `(id, owner_id, version)` and append the journal
    /// entry in one atomic step. Zero matched rows — a stale version or a
    /// nonexistent resource, the store does not distinguish — maps to
    /// [`ServiceError::BadRequest`].
    async fn update_resource(
        &self,
        resource: R,
        owner_id: &str,
        id: &str,
        identity: &AuthIdentity,
    ) -> ServiceResult<R>;
}

/// The update target named by the path must agree with the body.
pub(crate) fn validate_update_target(
    base: &ResourceBase,
    owner_id: &str,
    id: &str,
) -> ServiceResult<()> {
    if base.owner_id != owner_id {
        return Err(ServiceError::bad_request(
            "owner id passed in the request does not match owner id in body",
        ));
    }
    if base.id != id {
        return Err(ServiceError::bad_request(
            "resource id passed in the request does not match resource id in body",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_target_must_match_body() {
        let base = ResourceBase {
            id: "r1".into(),
            owner_id: "o1".into(),
            ..Default::default()
        };

        assert!(validate_update_target(&base, "o1", "r1").is_ok());
        assert!(matches!(
            validate_update_target(&base, "o2", "r1"),
            Err(ServiceError::BadRequest(_))
        ));
        assert!(matches!(
            validate_update_target(&base, "o1", "r2"),
            Err(ServiceError::BadRequest(_))
        ));
    }
}
