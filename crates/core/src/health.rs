//! Health-status document served by the standard health route.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const HEALTH_STATUS_HEALTHY: &str = "HEALTHY";
pub const HEALTH_STATUS_UNHEALTHY: &str = "UNHEALTHY";

/// Dependency key used for the database probe.
pub const DEPENDENCY_DATABASE: &str = "database";

/// The document returned by `GET /v1/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub dependency_status: BTreeMap<String, String>,
    pub called_services: Vec<String>,
}

impl HealthStatus {
    /// A healthy document with no dependencies probed yet.
    pub fn healthy(called_services: Vec<String>) -> Self {
        Self {
            status: HEALTH_STATUS_HEALTHY.to_string(),
            dependency_status: BTreeMap::new(),
            called_services,
        }
    }

    /// Record a dependency probe. Any unhealthy dependency makes the overall
    /// status unhealthy.
    pub fn record_dependency(&mut self, name: &str, healthy: bool) {
        let status = if healthy {
            HEALTH_STATUS_HEALTHY
        } else {
            self.status = HEALTH_STATUS_UNHEALTHY.to_string();
            HEALTH_STATUS_UNHEALTHY
        };
        self.dependency_status
            .insert(name.to_string(), status.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhealthy_dependency_degrades_overall_status() {
        let mut health = HealthStatus::healthy(vec![]);
        health.record_dependency(DEPENDENCY_DATABASE, false);

        assert_eq!(health.status, HEALTH_STATUS_UNHEALTHY);
        assert_eq!(
            health.dependency_status.get(DEPENDENCY_DATABASE).map(String::as_str),
            Some(HEALTH_STATUS_UNHEALTHY)
        );
    }

    #[test]
    fn serializes_camel_case() {
        let mut health = HealthStatus::healthy(vec!["identity".into()]);
        health.record_dependency(DEPENDENCY_DATABASE, true);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "HEALTHY");
        assert_eq!(json["dependencyStatus"]["database"], "HEALTHY");
        assert_eq!(json["calledServices"][0], "identity");
    }
}
