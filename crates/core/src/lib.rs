//! Shared foundation for siftd noun services.
//!
//! This crate carries the pieces every noun service needs regardless of its
//! business shape: the semantic error model that maps onto HTTP at the
//! transport boundary, the typed configuration loaded from the process
//! environment, and the health-status document served by the standard
//! health route.

/// Typed configuration loaded from the process environment.
pub mod config;
/// Semantic error model shared across service layers.
pub mod error;
/// Health-status document for the standard health route.
pub mod health;

pub use config::{Config, ConfigError};
pub use error::{ServiceError, ServiceResult, INTERNAL_SERVER_ERROR};
pub use health::{HealthStatus, HEALTH_STATUS_HEALTHY, HEALTH_STATUS_UNHEALTHY};
