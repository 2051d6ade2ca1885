//! In-memory resource store with a journal.
//!
//! Intended for tests and local development. Mirrors the Postgres semantics:
//! each mutation writes the resource row and its journal entry under one
//! lock, the clock increases by one per entry, and a conditional update that
//! matches nothing reports a bad request without touching anything.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use siftd_core::{ServiceError, ServiceResult};
use siftd_security::AuthIdentity;

use crate::resource::{JournalEntry, Resource};
use crate::store::{validate_update_target, JournalStore, ResourceStore};

struct StoredRow {
    owner_id: String,
    version: u64,
    deleted: bool,
    resource: serde_json::Value,
}

struct State {
    resources: HashMap<String, StoredRow>,
    journal: Vec<JournalEntry>,
    next_clock: u64,
}

/// In-memory twin of the Postgres store.
pub struct MemoryResourceStore<R> {
    state: RwLock<State>,
    partition_name: String,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> MemoryResourceStore<R> {
    pub fn new(partition_name: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(State {
                resources: HashMap::new(),
                journal: Vec::new(),
                next_clock: 1,
            }),
            partition_name: partition_name.into(),
            _resource: PhantomData,
        }
    }

    fn read_state(&self) -> ServiceResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| {
            tracing::error!("memory store - lock poisoned");
            ServiceError::Internal
        })
    }

    fn write_state(&self) -> ServiceResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| {
            tracing::error!("memory store - lock poisoned");
            ServiceError::Internal
        })
    }
}

#[async_trait]
impl<R: Resource> JournalStore for MemoryResourceStore<R> {
    async fn health_check(&self) -> ServiceResult<()> {
        self.read_state().map(|_| ())
    }

    async fn journal_changes(&self, clock: u64, limit: u64) -> ServiceResult<Vec<JournalEntry>> {
        let state = self.read_state()?;
        Ok(state
            .journal
            .iter()
            .filter(|entry| entry.clock >= clock)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn journal_max_clock(&self) -> ServiceResult<u64> {
        let state = self.read_state()?;
        Ok(state.journal.last().map(|entry| entry.clock).unwrap_or(0))
    }
}

#[async_trait]
impl<R: Resource> ResourceStore<R> for MemoryResourceStore<R> {
    async fn get_by_id(&self, id: &str, _owner_id: &str) -> ServiceResult<R> {
        let state = self.read_state()?;
        // Tombstones are returned; only owner-list queries filter them.
        let row = state
            .resources
            .get(id)
            .ok_or_else(|| ServiceError::not_found(id))?;

        serde_json::from_value(row.resource.clone()).map_err(|err| {
            tracing::error!(%err, "memory store - failed to deserialize stored resource");
            ServiceError::Internal
        })
    }

    async fn get_by_owner_id(&self, owner_id: &str) -> ServiceResult<Vec<R>> {
        let state = self.read_state()?;
        let mut resources = Vec::new();
        for row in state.resources.values() {
            if row.owner_id != owner_id || row.deleted {
                continue;
            }
            let resource = serde_json::from_value(row.resource.clone()).map_err(|err| {
                tracing::error!(%err, "memory store - failed to deserialize stored resource");
                ServiceError::Internal
            })?;
            resources.push(resource);
        }
        Ok(resources)
    }

    async fn create_resource(&self, mut resource: R, identity: &AuthIdentity) -> ServiceResult<R> {
        resource.base_mut().stamp_create(identity, Utc::now());

        let json = serde_json::to_value(&resource).map_err(|err| {
            tracing::error!(%err, "memory store - failed to serialize resource");
            ServiceError::Internal
        })?;
        let base = resource.base();

        let mut state = self.write_state()?;
        if state.resources.contains_key(&base.id) {
            return Err(ServiceError::already_exists(base.id.as_str()));
        }

        state.resources.insert(
            base.id.clone(),
            StoredRow {
                owner_id: base.owner_id.clone(),
                version: base.version,
                deleted: base.deleted,
                resource: json.clone(),
            },
        );

        let clock = state.next_clock;
        state.next_clock += 1;
        state.journal.push(JournalEntry {
            clock,
            resource: json,
            updated_at: base.updated_at,
            partition_name: self.partition_name.clone(),
        });

        drop(state);
        Ok(resource)
    }

    async fn update_resource(
        &self,
        mut resource: R,
        owner_id: &str,
        id: &str,
        identity: &AuthIdentity,
    ) -> ServiceResult<R> {
        validate_update_target(resource.base(), owner_id, id)?;

        let version_to_match = resource.base_mut().stamp_update(identity, Utc::now());
        let json = serde_json::to_value(&resource).map_err(|err| {
            tracing::error!(%err, "memory store - failed to serialize resource");
            ServiceError::Internal
        })?;
        let base = resource.base();

        let mut state = self.write_state()?;

        // Same predicate as the conditional SQL update.
        let matched = match state.resources.get_mut(&base.id) {
            Some(row) if row.version == version_to_match && row.owner_id == base.owner_id => row,
            _ => {
                return Err(ServiceError::bad_request(
                    "no rows were updated because the resource id does not exist or the version did not match",
                ));
            }
        };

        matched.version = base.version;
        matched.deleted = base.deleted;
        matched.resource = json.clone();

        let clock = state.next_clock;
        state.next_clock += 1;
        state.journal.push(JournalEntry {
            clock,
            resource: json,
            updated_at: base.updated_at,
            partition_name: self.partition_name.clone(),
        });

        drop(state);
        Ok(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    use crate::resource::ResourceBase;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Employee {
        name: String,
        age: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct EmployeeResource {
        #[serde(flatten)]
        base: ResourceBase,
        employee: Employee,
    }

    impl Resource for EmployeeResource {
        fn base(&self) -> &ResourceBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut ResourceBase {
            &mut self.base
        }
    }

    fn employee(owner: &str, name: &str, age: i64) -> EmployeeResource {
        EmployeeResource {
            base: ResourceBase {
                owner_id: owner.into(),
                ..Default::default()
            },
            employee: Employee {
                name: name.into(),
                age,
            },
        }
    }

    fn store() -> MemoryResourceStore<EmployeeResource> {
        MemoryResourceStore::new("unit-test-partition")
    }

    fn identity() -> AuthIdentity {
        AuthIdentity::new("member-1", "")
    }

    #[tokio::test]
    async fn create_appends_exactly_one_journal_entry() {
        let store = store();
        assert_eq!(store.journal_max_clock().await.unwrap(), 0);

        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &identity())
            .await
            .unwrap();

        assert_eq!(created.base.version, 1);
        assert_eq!(created.base.updated_by, "member-1");
        assert_eq!(created.base.created_at, created.base.updated_at);
        assert!(!created.base.id.is_empty());

        let entries = store.journal_changes(1, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].clock, 1);
        assert_eq!(entries[0].partition_name, "unit-test-partition");
        assert_eq!(store.journal_max_clock().await.unwrap(), 1);

        // The journal holds the full post-image.
        assert_eq!(entries[0].resource["employee"]["name"], "Alice");
        assert_eq!(entries[0].resource["version"], 1);
    }

    #[tokio::test]
    async fn create_with_duplicate_id_already_exists() {
        let store = store();
        let mut first = employee("owner-1", "Alice", 31);
        first.base.id = "fixed-id".into();
        store.create_resource(first, &identity()).await.unwrap();

        let mut second = employee("owner-1", "Bob", 44);
        second.base.id = "fixed-id".into();
        let err = store.create_resource(second, &identity()).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));

        // The failed create left no journal entry behind.
        assert_eq!(store.journal_max_clock().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store();
        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &identity())
            .await
            .unwrap();

        let fetched = store.get_by_id(&created.base.id, "owner-1").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn get_by_id_unknown_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get_by_id("nope", "owner-1").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_bumps_version_and_journals() {
        let store = store();
        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &identity())
            .await
            .unwrap();
        let id = created.base.id.clone();

        let mut changed = created.clone();
        changed.employee.age = 32;
        let updated = store
            .update_resource(changed, "owner-1", &id, &identity())
            .await
            .unwrap();

        assert_eq!(updated.base.version, 2);
        assert_eq!(store.journal_max_clock().await.unwrap(), 2);

        let fetched = store.get_by_id(&id, "owner-1").await.unwrap();
        assert_eq!(fetched.employee.age, 32);
        assert_eq!(fetched.base.version, 2);
    }

    #[tokio::test]
    async fn stale_version_update_is_rejected_and_changes_nothing() {
        let store = store();
        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &identity())
            .await
            .unwrap();
        let id = created.base.id.clone();

        // First update succeeds (version 1 -> 2).
        let mut first = created.clone();
        first.employee.age = 32;
        store
            .update_resource(first, "owner-1", &id, &identity())
            .await
            .unwrap();

        // Retrying with the stale version 1 fails.
        let mut stale = created.clone();
        stale.employee.age = 99;
        let err = store
            .update_resource(stale, "owner-1", &id, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));

        // Row and journal are untouched beyond the first two entries.
        let fetched = store.get_by_id(&id, "owner-1").await.unwrap();
        assert_eq!(fetched.employee.age, 32);
        assert_eq!(fetched.base.version, 2);
        assert_eq!(store.journal_max_clock().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_requires_matching_path_and_body() {
        let store = store();
        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &identity())
            .await
            .unwrap();
        let id = created.base.id.clone();

        let err = store
            .update_resource(created.clone(), "other-owner", &id, &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));

        let err = store
            .update_resource(created, "owner-1", "other-id", &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn soft_deleted_rows_stay_readable_by_id_but_leave_owner_lists() {
        let store = store();
        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &identity())
            .await
            .unwrap();
        let id = created.base.id.clone();

        let mut tombstone = created.clone();
        tombstone.base.deleted = true;
        store
            .update_resource(tombstone, "owner-1", &id, &identity())
            .await
            .unwrap();

        let by_id = store.get_by_id(&id, "owner-1").await.unwrap();
        assert!(by_id.base.deleted);

        let listed = store.get_by_owner_id("owner-1").await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn owner_list_is_empty_success_for_unknown_owner() {
        let store = store();
        let listed = store.get_by_owner_id("nobody").await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn journal_tail_is_ordered_inclusive_and_bounded() {
        let store = store();
        for (name, age) in [("Alice", 31), ("Bob", 44), ("Carol", 27)] {
            store
                .create_resource(employee("owner-1", name, age), &identity())
                .await
                .unwrap();
        }

        let max_clock = store.journal_max_clock().await.unwrap();
        assert_eq!(max_clock, 3);

        let all = store.journal_changes(1, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].clock < pair[1].clock));
        assert_eq!(all.last().unwrap().clock, max_clock);

        // Inclusive lower bound: an exact entry can be re-fetched.
        let exact = store.journal_changes(max_clock, 1).await.unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].clock, max_clock);

        // Limit bounds the result.
        let limited = store.journal_changes(1, 2).await.unwrap();
        assert_eq!(limited.len(), 2);

        // A cursor past the end yields an empty tail.
        let beyond = store.journal_changes(max_clock + 1, 10).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn identity_stamps_flow_into_the_stored_row() {
        let store = store();
        let acting = AuthIdentity::new("member-1", "csr-9");
        let created = store
            .create_resource(employee("owner-1", "Alice", 31), &acting)
            .await
            .unwrap();

        assert_eq!(created.base.updated_by, "member-1");
        assert_eq!(created.base.impersonated_by, "csr-9");

        let entries = store.journal_changes(1, 1).await.unwrap();
        assert_eq!(entries[0].resource["updatedBy"], "member-1");
        assert_eq!(entries[0].resource["impersonatedBy"], "csr-9");
    }
}
