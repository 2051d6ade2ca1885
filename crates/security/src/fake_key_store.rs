//! Test-mode identity service stand-in.
//!
//! Generates one 2048-bit RSA keypair at construction, persists both halves
//! as PEM next to the service's resource directory so other processes can
//! inspect them, and mints RS256-signed tokens for two fake identities. Both
//! minting operations refuse to run unless the service listens on localhost.

use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use uuid::Uuid;

use siftd_core::{Config, ConfigError};

use crate::claims::Claims;
use crate::realm::Realm;

/// Issuer stamped into every fake token.
pub const TOKEN_ISSUER: &str = "siftd-service-base";

/// Subject of fake user tokens.
pub const FAKE_MEMBER_IDENTITY: &str = "GUID-fake-member-GUID";
/// Subject of fake machine tokens.
pub const FAKE_SERVICE_IDENTITY: &str = "GUID-fake-service-GUID";

const PRIVATE_KEY_FILENAME: &str = "private.pem";
const PUBLIC_KEY_FILENAME: &str = "public.pem";

#[derive(Debug, Error)]
pub enum FakeKeyStoreError {
    #[error("fake JWT tokens can only be generated when the service is listening on localhost")]
    NotLocalhost,

    #[error("public key not found")]
    UnknownKid,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot generate RSA key pair for testing: {0}")]
    KeyGeneration(String),

    #[error("failed to encode key material: {0}")]
    KeyEncoding(String),

    #[error("failed to persist key material: {0}")]
    Persist(#[from] std::io::Error),

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Fake identity service: one generated keypair, two mintable identities.
pub struct FakeKeyStore {
    kid: String,
    listen_address: String,
    /// PKCS#1 DER, fed straight to the RS256 signer.
    private_key_der: Vec<u8>,
    /// SubjectPublicKeyInfo DER, served verbatim by `/v1/keys/{kid}`.
    public_key_der: Vec<u8>,
    debug_level: i32,
}

impl FakeKeyStore {
    /// Generate the keypair and persist both halves under `RESDIR_PATH`.
    pub fn new(config: &Config) -> Result<Self, FakeKeyStoreError> {
        let resdir = config.resdir_path()?;

        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|err| FakeKeyStoreError::KeyGeneration(err.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let kid = Uuid::new_v4().to_string();

        let private_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|err| FakeKeyStoreError::KeyEncoding(err.to_string()))?;
        std::fs::write(Path::new(resdir).join(PRIVATE_KEY_FILENAME), private_pem.as_bytes())?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| FakeKeyStoreError::KeyEncoding(err.to_string()))?;
        std::fs::write(Path::new(resdir).join(PUBLIC_KEY_FILENAME), public_pem)?;

        let private_key_der = private_key
            .to_pkcs1_der()
            .map_err(|err| FakeKeyStoreError::KeyEncoding(err.to_string()))?
            .as_bytes()
            .to_vec();
        let public_key_der = public_key
            .to_public_key_der()
            .map_err(|err| FakeKeyStoreError::KeyEncoding(err.to_string()))?
            .as_bytes()
            .to_vec();

        if config.debug_auth > 0 {
            tracing::info!(%kid, "fake key store - generated private/public key pair");
        }

        Ok(Self {
            kid,
            listen_address: config.listen_address.clone(),
            private_key_der,
            public_key_der,
            debug_level: config.debug_auth,
        })
    }

    /// The key id assigned to the generated pair.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Raw SubjectPublicKeyInfo DER for the generated key.
    pub fn get_public_key(&self, kid: &str) -> Result<&[u8], FakeKeyStoreError> {
        if kid == self.kid {
            Ok(&self.public_key_der)
        } else {
            Err(FakeKeyStoreError::UnknownKid)
        }
    }

    /// Mint a compact RS256 token for the fake member identity
    /// (`roles: ["admin"]`).
    pub fn mint_fake_user_token(&self) -> Result<String, FakeKeyStoreError> {
        self.mint(
            FAKE_MEMBER_IDENTITY,
            Realm::Member,
            "Fake (Member) User",
            Some(vec![serde_json::Value::String("admin".to_string())]),
        )
    }

    /// Mint a compact RS256 token for the fake machine identity.
    pub fn mint_fake_machine_token(&self) -> Result<String, FakeKeyStoreError> {
        self.mint(FAKE_SERVICE_IDENTITY, Realm::Machine, "Fake (Machine) Service", None)
    }

    fn mint(
        &self,
        sub: &str,
        realm: Realm,
        sub_name: &str,
        roles: Option<Vec<serde_json::Value>>,
    ) -> Result<String, FakeKeyStoreError> {
        // Guard against accidental use outside local testing.
        if !self.listen_address.contains("localhost") {
            return Err(FakeKeyStoreError::NotLocalhost);
        }

        let claims = Claims {
            sub: sub.to_string(),
            sub_type: realm.as_str().to_string(),
            sub_name: Some(sub_name.to_string()),
            iat: chrono::Utc::now().timestamp(),
            iss: Some(TOKEN_ISSUER.to_string()),
            jti: Some(Uuid::new_v4().to_string()),
            roles,
            impersonated_by: None,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());

        let token = jsonwebtoken::encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_der(&self.private_key_der),
        )?;

        if self.debug_level > 0 {
            tracing::info!(sub, realm = %realm, "fake key store - minted token");
        }

        Ok(token)
    }

    /// Sign arbitrary claims with the generated key. Test seam for building
    /// tokens the minting API would never produce (stale `iat`, odd realms).
    #[cfg(test)]
    pub(crate) fn sign_claims(&self, claims: &Claims) -> Result<String, FakeKeyStoreError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        Ok(jsonwebtoken::encode(
            &header,
            claims,
            &EncodingKey::from_rsa_der(&self.private_key_der),
        )?)
    }
}
