//! TTL-evicting RSA public-key cache.
//!
//! Keys are fetched from the identity service on demand
//! (`GET {IDENTITY_SERVICE}/v1/keys/{kid}`, raw SubjectPublicKeyInfo DER in
//! the body) and held until the freshness window lapses. Every map access —
//! lookup, insert, purge — happens under one mutex; the network fetch on a
//! miss runs outside the lock, so two concurrent misses for the same `kid`
//! may race and fetch twice. The second insert simply overwrites the first.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use thiserror::Error;

use siftd_core::{Config, ConfigError};

/// How long a fetched key stays trusted.
pub const PUBLIC_KEY_TTL: Duration = Duration::from_secs(900);

#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read self-signed CA bundle: {0}")]
    CaBundle(#[from] std::io::Error),

    #[error("failed to build identity-service HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

struct CachedKey {
    der: Vec<u8>,
    created_at: Instant,
}

/// In-process cache of RSA verification keys, keyed by `kid`.
///
/// A leaf component: it holds the identity-service URL and TLS material as
/// plain configuration and never references the host that owns it.
pub struct KeyCache {
    keys: Mutex<HashMap<String, CachedKey>>,
    client: reqwest::Client,
    identity_service: String,
    debug_level: i32,
}

impl KeyCache {
    /// Build a cache for the configured identity service.
    ///
    /// When the identity service is reached over `https` on `localhost` (the
    /// fake-identity setup), the client trusts the configured self-signed
    /// certificate; SNI is `localhost` because that is the URL host. Any
    /// other URL uses the default HTTPS transport.
    pub fn new(config: &Config) -> Result<Self, KeyCacheError> {
        let identity_service = config.identity_service()?.to_string();

        let client = if identity_service.starts_with("https")
            && identity_service.contains("localhost")
        {
            let resdir = config.resdir_path()?;
            let cert_file = config.https_cert_filename()?;
            let pem = std::fs::read(Path::new(resdir).join(cert_file))?;
            reqwest::Client::builder()
                .add_root_certificate(reqwest::Certificate::from_pem(&pem)?)
                .build()?
        } else {
            reqwest::Client::new()
        };

        Ok(Self {
            keys: Mutex::new(HashMap::new()),
            client,
            identity_service,
            debug_level: config.debug_auth,
        })
    }

    /// Look up the verification key for `kid`, fetching on a miss.
    ///
    /// `None` means the key is absent — unknown `kid`, identity service
    /// unreachable, or un-parseable key bytes — and the caller rejects the
    /// token as unauthorized.
    pub async fn get_public_key(&self, kid: &str) -> Option<DecodingKey> {
        self.purge_expired();

        let cached = {
            let keys = self.keys.lock().ok()?;
            keys.get(kid).map(|key| key.der.clone())
        };

        let (der, found_in_cache) = match cached {
            Some(der) => {
                if self.debug_level > 0 {
                    tracing::info!(kid, "key cache - key found in cache");
                }
                (der, true)
            }
            None => {
                if self.debug_level > 0 {
                    tracing::info!(kid, "key cache - key not found in cache");
                }
                match self.fetch_from_identity_service(kid).await {
                    Ok(der) => (der, false),
                    Err(err) => {
                        tracing::info!(kid, %err, "key cache - failed to fetch public key from identity service");
                        return None;
                    }
                }
            }
        };

        let key = parse_rsa_public_key(&der)?;

        if !found_in_cache {
            if let Ok(mut keys) = self.keys.lock() {
                keys.insert(
                    kid.to_string(),
                    CachedKey {
                        der,
                        created_at: Instant::now(),
                    },
                );
            }
        }

        Some(key)
    }

    fn purge_expired(&self) {
        let Ok(mut keys) = self.keys.lock() else {
            return;
        };
        keys.retain(|kid, key| {
            let fresh = key.created_at.elapsed() <= PUBLIC_KEY_TTL;
            if !fresh && self.debug_level > 0 {
                tracing::info!(kid, "key cache - purging old key");
            }
            fresh
        });
    }

    async fn fetch_from_identity_service(&self, kid: &str) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/v1/keys/{}", self.identity_service, kid);
        if self.debug_level > 0 {
            tracing::info!(%url, "key cache - calling identity service to fetch public key");
        }

        let response = self.client.get(&url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, kid: &str, der: Vec<u8>, created_at: Instant) {
        self.keys
            .lock()
            .unwrap()
            .insert(kid.to_string(), CachedKey { der, created_at });
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("identity service call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity service returned status code {0}")]
    Status(u16),
}

/// Parse SubjectPublicKeyInfo DER into a verification key.
///
/// `None` when the bytes are not a valid RSA public key.
fn parse_rsa_public_key(der: &[u8]) -> Option<DecodingKey> {
    let key = match RsaPublicKey::from_public_key_der(der) {
        Ok(key) => key,
        Err(err) => {
            tracing::info!(%err, "key cache - failed to parse public key");
            return None;
        }
    };

    match key.to_pkcs1_der() {
        Ok(pkcs1) => Some(DecodingKey::from_rsa_der(pkcs1.as_bytes())),
        Err(err) => {
            tracing::info!(%err, "key cache - failed to re-encode public key");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    fn test_config() -> Config {
        Config {
            service_instance_name: "key-cache-tests".into(),
            listen_address: "http://localhost:0".into(),
            db_connect_string: None,
            journal_partition_name: None,
            identity_service: Some("http://localhost:1".into()),
            called_services: Vec::new(),
            https_cert_filename: None,
            https_key_filename: None,
            resdir_path: None,
            debug_auth: 0,
        }
    }

    fn generate_spki_der() -> Vec<u8> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("generate key");
        RsaPublicKey::from(&private)
            .to_public_key_der()
            .expect("encode spki")
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn missing_identity_service_is_a_construction_error() {
        let mut config = test_config();
        config.identity_service = None;
        assert!(matches!(
            KeyCache::new(&config),
            Err(KeyCacheError::Config(_))
        ));
    }

    #[test]
    fn parses_spki_rsa_keys_and_rejects_garbage() {
        let der = generate_spki_der();
        assert!(parse_rsa_public_key(&der).is_some());
        assert!(parse_rsa_public_key(b"not a key").is_none());
    }

    #[tokio::test]
    async fn cache_hit_avoids_the_identity_service() {
        // The configured identity service is unreachable, so any miss would
        // return None. A pre-seeded fresh entry must be served from the map.
        let cache = KeyCache::new(&test_config()).unwrap();
        cache.insert_for_test("kid-1", generate_spki_der(), Instant::now());

        assert!(cache.get_public_key("kid-1").await.is_some());
        assert_eq!(cache.entry_count(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_purged_before_lookup() {
        let cache = KeyCache::new(&test_config()).unwrap();
        let Some(stale) = Instant::now().checked_sub(PUBLIC_KEY_TTL + Duration::from_secs(1))
        else {
            // Monotonic clock too young to represent a stale timestamp.
            return;
        };
        cache.insert_for_test("kid-stale", generate_spki_der(), stale);

        // Purged on access, then the (unreachable) fetch fails -> absent.
        assert!(cache.get_public_key("kid-stale").await.is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn unknown_kid_with_unreachable_service_is_absent() {
        let cache = KeyCache::new(&test_config()).unwrap();
        assert!(cache.get_public_key("nope").await.is_none());
    }
}
