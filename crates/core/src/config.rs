//! Typed configuration loaded from the process environment.
//!
//! Only the service instance name and listen address are required up front;
//! the remaining keys are validated by the component that needs them
//! (the store requires the connection string and partition name, the key
//! cache requires the identity-service URL, and so on). Missing a required
//! key is fatal: the accessor returns [`ConfigError::Missing`] and the
//! process is expected to log the reason and exit before listening.

use thiserror::Error;

/// Environment keys understood by the service base.
pub mod keys {
    pub const SERVICE_INSTANCE_NAME: &str = "SERVICE_INSTANCE_NAME";
    pub const LISTEN_ADDRESS: &str = "LISTEN_ADDRESS";
    pub const DB_CONNECTSTRING: &str = "DB_CONNECTSTRING";
    pub const JOURNAL_PARTITION_NAME: &str = "JOURNAL_PARTITION_NAME";
    pub const IDENTITY_SERVICE: &str = "IDENTITY_SERVICE";
    pub const CALLED_SERVICES: &str = "CALLED_SERVICES";
    pub const HTTPS_CERT_FILENAME: &str = "HTTPS_CERT_FILENAME";
    pub const HTTPS_KEY_FILENAME: &str = "HTTPS_KEY_FILENAME";
    pub const RESDIR_PATH: &str = "RESDIR_PATH";
    pub const DEBUGSIFTD_AUTH: &str = "DEBUGSIFTD_AUTH";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required configuration key '{0}' is not set")]
    Missing(&'static str),

    #[error("configuration key '{key}' is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Configuration for a single service instance.
///
/// `service_instance_name` and `listen_address` are validated at load time.
/// Everything else is held as loaded and checked by the component that
/// consumes it, so a service that never touches the database does not need a
/// connection string.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_instance_name: String,
    pub listen_address: String,
    pub db_connect_string: Option<String>,
    pub journal_partition_name: Option<String>,
    pub identity_service: Option<String>,
    pub called_services: Vec<String>,
    pub https_cert_filename: Option<String>,
    pub https_key_filename: Option<String>,
    pub resdir_path: Option<String>,
    /// Verbose auth tracing when > 0 (`DEBUGSIFTD_AUTH`).
    pub debug_auth: i32,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_instance_name =
            require_env(keys::SERVICE_INSTANCE_NAME)?;
        let listen_address = require_env(keys::LISTEN_ADDRESS)?;

        let called_services = match optional_env(keys::CALLED_SERVICES) {
            Some(raw) => parse_called_services(&raw),
            None => Vec::new(),
        };

        let debug_auth = optional_env(keys::DEBUGSIFTD_AUTH)
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(0);

        Ok(Self {
            service_instance_name,
            listen_address,
            db_connect_string: optional_env(keys::DB_CONNECTSTRING),
            journal_partition_name: optional_env(keys::JOURNAL_PARTITION_NAME),
            identity_service: optional_env(keys::IDENTITY_SERVICE),
            called_services,
            https_cert_filename: optional_env(keys::HTTPS_CERT_FILENAME),
            https_key_filename: optional_env(keys::HTTPS_KEY_FILENAME),
            resdir_path: optional_env(keys::RESDIR_PATH),
            debug_auth,
        })
    }

    pub fn db_connect_string(&self) -> Result<&str, ConfigError> {
        require_field(&self.db_connect_string, keys::DB_CONNECTSTRING)
    }

    pub fn journal_partition_name(&self) -> Result<&str, ConfigError> {
        require_field(&self.journal_partition_name, keys::JOURNAL_PARTITION_NAME)
    }

    pub fn identity_service(&self) -> Result<&str, ConfigError> {
        require_field(&self.identity_service, keys::IDENTITY_SERVICE)
    }

    pub fn https_cert_filename(&self) -> Result<&str, ConfigError> {
        require_field(&self.https_cert_filename, keys::HTTPS_CERT_FILENAME)
    }

    pub fn https_key_filename(&self) -> Result<&str, ConfigError> {
        require_field(&self.https_key_filename, keys::HTTPS_KEY_FILENAME)
    }

    pub fn resdir_path(&self) -> Result<&str, ConfigError> {
        require_field(&self.resdir_path, keys::RESDIR_PATH)
    }

    /// Whether fake-token minting is permitted (listen address on localhost).
    pub fn is_local_listen(&self) -> bool {
        self.listen_address.contains("localhost")
    }
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn require_field<'a>(
    field: &'a Option<String>,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    field.as_deref().ok_or(ConfigError::Missing(key))
}

/// `CALLED_SERVICES` is a JSON array of service names. A malformed value is
/// logged and treated as empty rather than refusing to start.
fn parse_called_services(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(services) => services,
        Err(err) => {
            tracing::warn!(%err, "failed to parse CALLED_SERVICES as a JSON array; ignoring");
            Vec::new()
        }
    }
}
