//! Postgres-backed resource store with an atomic journal.
//!
//! Both mutations run as a single CTE statement that writes the resource row
//! and the journal row together, so crash recovery can never observe one
//! without the other. The journal clock is a `BIGSERIAL` assigned by the
//! database in insert order, which is what makes it totally ordered within a
//! partition.
//!
//! ## Error redaction
//!
//! SQLx errors are logged verbatim at `error` level and surfaced to callers
//! as [`ServiceError::Internal`], except SQLSTATE `23505` (unique violation)
//! which maps to [`ServiceError::AlreadyExists`]. Driver text never reaches
//! an HTTP client.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use siftd_core::{Config, ServiceError, ServiceResult};
use siftd_security::AuthIdentity;

use crate::resource::{JournalEntry, Resource};
use crate::store::{validate_update_target, JournalStore, ResourceStore};

/// Conflict on a primary key.
const PRIMARY_KEY_VIOLATION_SQL_CODE: &str = "23505";

const HEALTH_CHECK_SQL: &str = "SELECT 1";

const GET_BY_ID_SQL: &str = r#"
    SELECT "Resource"
    FROM "Resources"
    WHERE "Id" = $1
"#;

const GET_BY_OWNER_ID_SQL: &str = r#"
    SELECT "Resource"
    FROM "Resources"
    WHERE "OwnerId" = $1
        AND "Deleted" = false
"#;

const JOURNAL_CHANGES_SQL: &str = r#"
    SELECT "Clock", "Resource", "CreatedAt", "PartitionName"
    FROM "Journal"
    WHERE "Clock" >= $1
    ORDER BY "Clock"
    LIMIT $2
"#;

const JOURNAL_MAX_CLOCK_SQL: &str = r#"
    SELECT MAX("Clock") AS "Clock"
    FROM "Journal"
"#;

/// Resource insert and journal append in one statement.
const INSERT_WITH_JOURNAL_SQL: &str = r#"
    WITH cte AS (
        INSERT INTO "Resources"
            ("Id", "OwnerId", "Version", "CreatedAt", "UpdatedAt", "Deleted", "Resource")
        VALUES
            ($1, $2, $3, $4, $5, $6, $7)
        RETURNING "Resource"
    )
    INSERT INTO "Journal"
        ("Resource", "CreatedAt", "PartitionName")
    SELECT
        "Resource", $5, $8
    FROM cte
"#;

/// Conditional resource update and journal append in one statement. When the
/// `(id, owner, version)` predicate matches nothing, the CTE is empty and the
/// journal insert writes zero rows.
const UPDATE_WITH_JOURNAL_SQL: &str = r#"
    WITH cte AS (
        UPDATE "Resources"
        SET
            "Version" = $1,
            "UpdatedAt" = $2,
            "Deleted" = $3,
            "OwnerId" = $4,
            "Resource" = $5
        WHERE "Id" = $6
            AND "Version" = $7
            AND "OwnerId" = $4
        RETURNING "Resource"
    )
    INSERT INTO "Journal"
        ("Resource", "CreatedAt", "PartitionName")
    SELECT
        "Resource", $2, $8
    FROM cte
"#;

/// Production store: versioned CRUD over `"Resources"` plus an append-only
/// `"Journal"`, one pooled connection per logical operation.
pub struct PostgresResourceStore<R> {
    pool: PgPool,
    partition_name: String,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> PostgresResourceStore<R> {
    /// Connect the pool and verify it with a ping. Construction failures are
    /// fatal to the service; the precise reason is logged here.
    pub async fn connect(config: &Config) -> ServiceResult<Self> {
        let connect_string = config.db_connect_string().map_err(|err| {
            tracing::error!(%err, "resource store - missing database configuration");
            ServiceError::Internal
        })?;
        let partition_name = config
            .journal_partition_name()
            .map_err(|err| {
                tracing::error!(%err, "resource store - missing journal partition name");
                ServiceError::Internal
            })?
            .to_string();

        let pool = PgPoolOptions::new()
            .connect(connect_string)
            .await
            .map_err(|err| map_sqlx_error("connect", err))?;

        sqlx::query(HEALTH_CHECK_SQL)
            .execute(&pool)
            .await
            .map_err(|err| map_sqlx_error("ping", err))?;

        tracing::info!("resource store - successfully connected to database");

        Ok(Self {
            pool,
            partition_name,
            _resource: PhantomData,
        })
    }

    /// Apply the bundled schema migrations (resource + journal tables).
    pub async fn run_migrations(&self) -> ServiceResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| {
                tracing::error!(%err, "resource store - migration failed");
                ServiceError::Internal
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn partition_name(&self) -> &str {
        &self.partition_name
    }
}

#[async_trait]
impl<R: Resource> JournalStore for PostgresResourceStore<R> {
    async fn health_check(&self) -> ServiceResult<()> {
        sqlx::query(HEALTH_CHECK_SQL)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| map_sqlx_error("health_check", err))
    }

    async fn journal_changes(&self, clock: u64, limit: u64) -> ServiceResult<Vec<JournalEntry>> {
        let rows = sqlx::query(JOURNAL_CHANGES_SQL)
            .bind(clock as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("journal_changes", err))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(journal_entry_from_row(&row)?);
        }
        Ok(entries)
    }

    async fn journal_max_clock(&self) -> ServiceResult<u64> {
        let row = sqlx::query(JOURNAL_MAX_CLOCK_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("journal_max_clock", err))?;

        // MAX over an empty journal is NULL.
        let max: Option<i64> = row.try_get("Clock").map_err(|err| {
            tracing::error!(%err, "resource store - failed to read max clock");
            ServiceError::Internal
        })?;
        Ok(max.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl<R: Resource> ResourceStore<R> for PostgresResourceStore<R> {
    async fn get_by_id(&self, id: &str, _owner_id: &str) -> ServiceResult<R> {
        let row = sqlx::query(GET_BY_ID_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("get_by_id", err))?;

        let Some(row) = row else {
            return Err(ServiceError::not_found(id));
        };

        resource_from_row(&row)
    }

    async fn get_by_owner_id(&self, owner_id: &str) -> ServiceResult<Vec<R>> {
        let rows = sqlx::query(GET_BY_OWNER_ID_SQL)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("get_by_owner_id", err))?;

        let mut resources = Vec::with_capacity(rows.len());
        for row in rows {
            resources.push(resource_from_row(&row)?);
        }
        Ok(resources)
    }

    async fn create_resource(&self, mut resource: R, identity: &AuthIdentity) -> ServiceResult<R> {
        resource.base_mut().stamp_create(identity, Utc::now());

        let json = serialize_resource(&resource, "create_resource")?;
        let base = resource.base();

        sqlx::query(INSERT_WITH_JOURNAL_SQL)
            .bind(&base.id)
            .bind(&base.owner_id)
            .bind(base.version as i64)
            .bind(base.created_at)
            .bind(base.updated_at)
            .bind(base.deleted)
            .bind(&json)
            .bind(&self.partition_name)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    tracing::error!(id = %base.id, %err, "resource store - insert conflict in create_resource");
                    ServiceError::already_exists(base.id.as_str())
                } else {
                    map_sqlx_error("create_resource", err)
                }
            })?;

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
        let json = serialize_resource(&resource, "update_resource")?;
        let base = resource.base();

        let result = sqlx::query(UPDATE_WITH_JOURNAL_SQL)
            .bind(base.version as i64)
            .bind(base.updated_at)
            .bind(base.deleted)
            .bind(&base.owner_id)
            .bind(&json)
            .bind(&base.id)
            .bind(version_to_match as i64)
            .bind(&self.partition_name)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    tracing::error!(id = %base.id, %err, "resource store - conflict in update_resource");
                    ServiceError::already_exists(base.id.as_str())
                } else {
                    map_sqlx_error("update_resource", err)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::bad_request(
                "no rows were updated because the resource id does not exist or the version did not match",
            ));
        }

        Ok(resource)
    }
}

fn serialize_resource<R: Resource>(resource: &R, operation: &str) -> ServiceResult<serde_json::Value> {
    serde_json::to_value(resource).map_err(|err| {
        tracing::error!(operation, %err, "resource store - failed to serialize resource");
        ServiceError::Internal
    })
}

fn resource_from_row<R: Resource>(row: &sqlx::postgres::PgRow) -> ServiceResult<R> {
    let json: serde_json::Value = row.try_get("Resource").map_err(|err| {
        tracing::error!(%err, "resource store - failed to read resource column");
        ServiceError::Internal
    })?;

    serde_json::from_value(json).map_err(|err| {
        tracing::error!(%err, "resource store - failed to deserialize stored resource");
        ServiceError::Internal
    })
}

fn journal_entry_from_row(row: &sqlx::postgres::PgRow) -> ServiceResult<JournalEntry> {
    let read = |err: sqlx::Error| {
        tracing::error!(%err, "resource store - failed to read journal row");
        ServiceError::Internal
    };

    let clock: i64 = row.try_get("Clock").map_err(read)?;
    let resource: serde_json::Value = row.try_get("Resource").map_err(read)?;
    let updated_at: DateTime<Utc> = row.try_get("CreatedAt").map_err(read)?;
    let partition_name: String = row.try_get("PartitionName").map_err(read)?;

    Ok(JournalEntry {
        clock: clock as u64,
        resource,
        updated_at,
        partition_name,
    })
}

/// Log the driver error verbatim and collapse it to the redacted internal
/// error; `23505` is the one code callers are allowed to distinguish.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ServiceError {
    if is_unique_violation(&err) {
        tracing::error!(operation, %err, "resource store - unique key violation");
        return ServiceError::already_exists(operation);
    }

    tracing::error!(operation, %err, "resource store - database error");
    ServiceError::Internal
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == PRIMARY_KEY_VIOLATION_SQL_CODE;
        }
    }
    false
}
