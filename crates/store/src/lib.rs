//! Journaled resource store.
//!
//! Every noun service persists versioned resources plus an append-only
//! change journal. The two writes happen in a single atomic step, producing a
//! monotonically increasing clock that downstream consumers tail.
//!
//! [`ResourceStore`] is the seam: [`PostgresResourceStore`] is the production
//! implementation (one CTE statement per mutation), [`MemoryResourceStore`]
//! is the in-process twin for tests and local development.

/// In-memory store for tests/dev.
pub mod memory;
/// Postgres-backed store.
pub mod postgres;
/// Resource base fields, journal entries, and the `Resource` trait.
pub mod resource;
/// Store traits shared by the backends.
pub mod store;

pub use memory::MemoryResourceStore;
pub use postgres::PostgresResourceStore;
pub use resource::{JournalEntry, JournalMaxClock, Resource, ResourceBase};
pub use store::{JournalStore, ResourceStore};
