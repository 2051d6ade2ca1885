//! Resource base fields, journal entries, and the [`Resource`] trait.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use siftd_security::AuthIdentity;

/// Fields embedded in every stored entity.
///
/// Flatten this into the concrete resource shape so the stored JSON carries
/// the base fields at the top level:
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use siftd_store::{Resource, ResourceBase};
///
/// #[derive(Serialize, Deserialize)]
/// struct EmployeeResource {
///     #[serde(flatten)]
///     base: ResourceBase,
///     employee: Employee,
/// }
///
/// #[derive(Serialize, Deserialize)]
/// struct Employee {
///     name: String,
///     age: i64,
/// }
///
/// impl Resource for EmployeeResource {
///     fn base(&self) -> &ResourceBase {
///         &self.base
///     }
///     fn base_mut(&mut self) -> &mut ResourceBase {
///         &mut self.base
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceBase {
    /// Primary key. Clients may supply one; the store assigns a v4 UUID
    /// otherwise.
    pub id: String,
    /// Partitioning key for list queries.
    pub owner_id: String,
    /// Optimistic concurrency token. Starts at 1, +1 per successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    /// Empty when the caller acted as themselves.
    pub impersonated_by: String,
    /// Short audit note (optional).
    pub last_action: String,
    /// Soft-delete flag. Tombstones stay readable by id but drop out of
    /// owner-list queries.
    pub deleted: bool,
}

impl Default for ResourceBase {
    fn default() -> Self {
        Self {
            id: String::new(),
            owner_id: String::new(),
            version: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_by: String::new(),
            impersonated_by: String::new(),
            last_action: String::new(),
            deleted: false,
        }
    }
}

impl ResourceBase {
    /// Server-side stamps for a create: fresh timestamps, version 1, caller
    /// identity, and an assigned id when the client supplied none.
    pub fn stamp_create(&mut self, identity: &AuthIdentity, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
        self.version = 1;
        self.deleted = false;

        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }

        self.updated_by = identity.sub.clone();
        self.impersonated_by = identity.impersonated_by.clone();
    }

    /// Server-side stamps for an update. Returns the version the conditional
    /// write must match; `self.version` becomes that value + 1.
    pub fn stamp_update(&mut self, identity: &AuthIdentity, now: DateTime<Utc>) -> u64 {
        self.updated_by = identity.sub.clone();
        self.impersonated_by = identity.impersonated_by.clone();
        self.updated_at = now;

        let version_to_match = self.version;
        self.version = version_to_match + 1;
        version_to_match
    }
}

/// Any storable resource: serializable, and able to expose its embedded
/// [`ResourceBase`].
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn base(&self) -> &ResourceBase;
    fn base_mut(&mut self) -> &mut ResourceBase;
}

/// One append-only journal row: the full post-image of a resource at a
/// mutation, tagged with the database-assigned clock and the partition it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Strictly monotonically increasing (gap-tolerant) within a partition.
    pub clock: u64,
    /// Serialized post-image, round-trippable as JSON.
    pub resource: serde_json::Value,
    /// When the mutation happened.
    pub updated_at: DateTime<Utc>,
    pub partition_name: String,
}

/// Response body of the journal max-clock route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalMaxClock {
    pub max_clock: u64,
}
