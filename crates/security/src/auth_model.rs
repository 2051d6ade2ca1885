//! Per-request authentication/authorization pipeline.
//!
//! An [`AuthModel`] holds an ordered list of policies and decides, per
//! request, whether to admit the caller. Authentication (RS256 signature and
//! policy-driven freshness) runs first; authorization walks the policy list
//! in insertion order and admits on the first match. Failures collapse to
//! [`AuthError::Unauthorized`] or [`AuthError::Forbidden`] — the detail is
//! logged, never returned, so rejections give an attacker nothing to probe.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation};
use thiserror::Error;

use siftd_core::ServiceError;

use crate::claims::{decode_claims_unverified, AuthIdentity, Claims};
use crate::key_cache::KeyCache;
use crate::policy::{validate_addition, AuthPolicy, AuthRule, AuthTimeout, PolicyError};
use crate::realm::Realm;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Bad or expired signature, missing claims, unknown key.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but no policy admits the request.
    #[error("forbidden")]
    Forbidden,
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => ServiceError::Unauthorized,
            AuthError::Forbidden => ServiceError::Forbidden,
        }
    }
}

/// Ordered policy set plus the key cache it authenticates against.
///
/// Policies are added during wiring, before the first request; afterwards the
/// model is shared immutably behind an `Arc` and is safe to read concurrently
/// without synchronization.
#[derive(Clone)]
pub struct AuthModel {
    policies: Vec<AuthPolicy>,
    key_cache: Arc<KeyCache>,
    debug_level: i32,
}

impl AuthModel {
    pub fn new(key_cache: Arc<KeyCache>, debug_level: i32) -> Self {
        Self {
            policies: Vec::new(),
            key_cache,
            debug_level,
        }
    }

    /// Append a policy, enforcing the validity rules (see
    /// [`validate_addition`]). A rejected addition leaves the model unchanged.
    pub fn add_policy(
        &mut self,
        realm: Realm,
        rule: AuthRule,
        timeout: AuthTimeout,
    ) -> Result<(), PolicyError> {
        let candidate = AuthPolicy { realm, rule, timeout };
        validate_addition(&self.policies, &candidate)?;
        self.policies.push(candidate);
        Ok(())
    }

    pub fn policies(&self) -> &[AuthPolicy] {
        &self.policies
    }

    /// Whether this model short-circuits all checks (single `NoAuth` policy).
    pub fn is_no_auth(&self) -> bool {
        self.policies.first().is_some_and(|p| p.rule.is_no_auth())
    }

    /// Run the full pipeline for one request.
    ///
    /// `authorization` is the raw `Authorization` header value — the compact
    /// JWT itself, no `Bearer ` prefix. `url_identity` is the `identityId`
    /// path variable when the route has one.
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        url_identity: Option<&str>,
    ) -> Result<AuthIdentity, AuthError> {
        if self.policies.is_empty() {
            tracing::info!("authz - no auth policy was found - unauthorized");
            return Err(AuthError::Unauthorized);
        }
        if self.is_no_auth() {
            self.trace("authz - a NoAuth policy was found - authorized");
            return Ok(AuthIdentity::anonymous());
        }

        let token = match authorization.filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => {
                self.trace("authn - missing Authorization header");
                return Err(AuthError::Unauthorized);
            }
        };

        let claims = self.authenticate(token).await?;

        if !self.claims_authorized(&claims, url_identity) {
            self.trace("authz - no policy authorized the request");
            return Err(AuthError::Forbidden);
        }

        Ok(AuthIdentity::from_claims(&claims))
    }

    /// Signature and freshness checks. Any failure is logged (at the debug
    /// level) and collapses to `Unauthorized`.
    async fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|err| {
            self.reject_authn(format_args!("failed to decode token header: {err}"))
        })?;

        if header.alg != Algorithm::RS256 {
            return Err(self.reject_authn(format_args!(
                "unexpected signing method detected: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| self.reject_authn(format_args!("token header is missing 'kid'")))?;

        // Read sub_type/iat before verification so the freshness window can
        // be chosen from the matching policy. Nothing here is trusted until
        // the signature verifies below.
        let unverified = decode_claims_unverified(token)
            .map_err(|err| self.reject_authn(format_args!("failed to decode claims: {err}")))?;

        // First policy whose realm matches the token picks the window. A
        // token from a realm no policy covers gets a zero window and is
        // stale by definition.
        let timeout = self
            .policies
            .iter()
            .find(|p| p.realm.matches_claim(&unverified.sub_type))
            .map(|p| p.timeout)
            .unwrap_or(AuthTimeout::NO_EXPIRY);

        let expiry = unverified.iat + timeout.as_secs();
        if chrono::Utc::now().timestamp() >= expiry {
            return Err(self.reject_authn(format_args!(
                "detected expired token issued over {} seconds ago",
                timeout.as_secs()
            )));
        }

        let key = self
            .key_cache
            .get_public_key(&kid)
            .await
            .ok_or_else(|| self.reject_authn(format_args!("error getting signing key")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.required_spec_claims = Default::default();

        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation).map_err(|err| {
            self.reject_authn(format_args!("signature verification failed: {err}"))
        })?;

        Ok(data.claims)
    }

    /// Walk the policy list in insertion order; the first match admits.
    fn claims_authorized(&self, claims: &Claims, url_identity: Option<&str>) -> bool {
        for policy in &self.policies {
            if !policy.realm.matches_claim(&claims.sub_type) {
                continue;
            }

            match &policy.rule {
                AuthRule::NoAuth => return true,
                AuthRule::ValidIdentity => {
                    // Authentication already ran.
                    self.trace("authz - authorized based on valid identity");
                    return true;
                }
                AuthRule::MatchingIdentity => {
                    if url_identity == Some(claims.sub.as_str()) {
                        self.trace("authz - authorized based on matching (URL) identity");
                        return true;
                    }
                    self.trace("authz - identity did not match URL");
                }
                AuthRule::ApprovedGroups(list) => {
                    if claims
                        .string_roles()
                        .any(|role| list.iter().any(|approved| approved == role))
                    {
                        self.trace("authz - authorized based on a group (roles) match");
                        return true;
                    }
                    self.trace("authz - group not found in the approved list");
                }
                AuthRule::ApprovedIdentities(list) => {
                    if list.iter().any(|approved| approved == &claims.sub) {
                        self.trace("authz - authorized based on presence in approved identities list");
                        return true;
                    }
                    self.trace("authz - identity not found in the approved list");
                }
            }
        }

        false
    }

    fn reject_authn(&self, msg: std::fmt::Arguments<'_>) -> AuthError {
        if self.debug_level > 0 {
            tracing::info!("authn - {msg}");
        }
        AuthError::Unauthorized
    }

    fn trace(&self, msg: &str) {
        if self.debug_level > 0 {
            tracing::info!("{msg}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use serde_json::json;
    use uuid::Uuid;

    use siftd_core::Config;

    use crate::fake_key_store::{FakeKeyStore, FAKE_MEMBER_IDENTITY, FAKE_SERVICE_IDENTITY, TOKEN_ISSUER};

    fn test_config(resdir: &std::path::Path) -> Config {
        Config {
            service_instance_name: "auth-model-tests".into(),
            listen_address: "http://localhost:0".into(),
            db_connect_string: None,
            journal_partition_name: None,
            // Unreachable on purpose: every key must come from the seeded cache.
            identity_service: Some("http://localhost:1".into()),
            called_services: Vec::new(),
            https_cert_filename: None,
            https_key_filename: None,
            resdir_path: Some(resdir.to_string_lossy().into_owned()),
            debug_auth: 0,
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        key_store: FakeKeyStore,
        key_cache: Arc<KeyCache>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = test_config(dir.path());
            let key_store = FakeKeyStore::new(&config).unwrap();
            let key_cache = Arc::new(KeyCache::new(&config).unwrap());
            key_cache.insert_for_test(
                key_store.kid(),
                key_store.get_public_key(key_store.kid()).unwrap().to_vec(),
                Instant::now(),
            );
            Self {
                _dir: dir,
                key_store,
                key_cache,
            }
        }

        fn model(&self, realm: Realm, rule: AuthRule, timeout: AuthTimeout) -> AuthModel {
            let mut model = AuthModel::new(Arc::clone(&self.key_cache), 0);
            model.add_policy(realm, rule, timeout).unwrap();
            model
        }

        fn sign(&self, claims: &Claims) -> String {
            self.key_store.sign_claims(claims).unwrap()
        }
    }

    fn member_claims(iat: i64) -> Claims {
        Claims {
            sub: FAKE_MEMBER_IDENTITY.into(),
            sub_type: "Member".into(),
            sub_name: Some("Fake (Member) User".into()),
            iat,
            iss: Some(TOKEN_ISSUER.into()),
            jti: Some(Uuid::new_v4().to_string()),
            roles: Some(vec![json!("admin")]),
            impersonated_by: None,
        }
    }

    #[tokio::test]
    async fn no_auth_model_admits_without_a_token() {
        let harness = Harness::new();
        let model = harness.model(Realm::NoRealm, AuthRule::NoAuth, AuthTimeout::NO_EXPIRY);

        let identity = model.authorize(None, None).await.unwrap();
        assert_eq!(identity, AuthIdentity::anonymous());
    }

    #[tokio::test]
    async fn valid_identity_admits_a_fresh_member_token() {
        let harness = Harness::new();
        let model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);
        let token = harness.key_store.mint_fake_user_token().unwrap();

        let identity = model.authorize(Some(&token), None).await.unwrap();
        assert_eq!(identity.sub, FAKE_MEMBER_IDENTITY);
        assert_eq!(identity.impersonated_by, "");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let harness = Harness::new();
        let model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);

        assert_eq!(model.authorize(None, None).await, Err(AuthError::Unauthorized));
        assert_eq!(
            model.authorize(Some(""), None).await,
            Err(AuthError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let harness = Harness::new();
        let model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_DAY);

        let two_days_ago = chrono::Utc::now().timestamp() - 2 * 86_400;
        let token = harness.sign(&member_claims(two_days_ago));

        assert_eq!(
            model.authorize(Some(&token), None).await,
            Err(AuthError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn wrong_realm_token_gets_a_zero_freshness_window() {
        // No policy covers Machine, so the fallback window is zero and even a
        // freshly minted machine token is stale.
        let harness = Harness::new();
        let model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);
        let token = harness.key_store.mint_fake_machine_token().unwrap();

        assert_eq!(
            model.authorize(Some(&token), None).await,
            Err(AuthError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn matching_identity_checks_the_url_variable() {
        let harness = Harness::new();
        let model = harness.model(
            Realm::Member,
            AuthRule::MatchingIdentity,
            AuthTimeout::ONE_HOUR,
        );
        let token = harness.key_store.mint_fake_user_token().unwrap();

        let identity = model
            .authorize(Some(&token), Some(FAKE_MEMBER_IDENTITY))
            .await
            .unwrap();
        assert_eq!(identity.sub, FAKE_MEMBER_IDENTITY);

        assert_eq!(
            model.authorize(Some(&token), Some("different-identity")).await,
            Err(AuthError::Forbidden)
        );
        assert_eq!(
            model.authorize(Some(&token), None).await,
            Err(AuthError::Forbidden)
        );
    }

    #[tokio::test]
    async fn approved_groups_matches_any_string_role() {
        let harness = Harness::new();
        let model = harness.model(
            Realm::Member,
            AuthRule::ApprovedGroups(vec!["admin".into()]),
            AuthTimeout::ONE_HOUR,
        );
        let token = harness.key_store.mint_fake_user_token().unwrap();

        // Admitted regardless of the URL identity.
        assert!(model
            .authorize(Some(&token), Some("someone-else"))
            .await
            .is_ok());

        let other = harness.model(
            Realm::Member,
            AuthRule::ApprovedGroups(vec!["operations".into()]),
            AuthTimeout::ONE_HOUR,
        );
        assert_eq!(
            other.authorize(Some(&token), None).await,
            Err(AuthError::Forbidden)
        );
    }

    #[tokio::test]
    async fn approved_groups_skips_non_string_roles() {
        let harness = Harness::new();
        let model = harness.model(
            Realm::Member,
            AuthRule::ApprovedGroups(vec!["admin".into()]),
            AuthTimeout::ONE_HOUR,
        );

        let mut claims = member_claims(chrono::Utc::now().timestamp());
        claims.roles = Some(vec![json!(42), json!({"role": "admin"}), json!("admin")]);
        let token = harness.sign(&claims);

        assert!(model.authorize(Some(&token), None).await.is_ok());
    }

    #[tokio::test]
    async fn approved_identities_consults_the_list() {
        let harness = Harness::new();
        let token = harness.key_store.mint_fake_user_token().unwrap();

        let listed = harness.model(
            Realm::Member,
            AuthRule::ApprovedIdentities(vec![FAKE_MEMBER_IDENTITY.into()]),
            AuthTimeout::ONE_HOUR,
        );
        assert!(listed.authorize(Some(&token), None).await.is_ok());

        let unlisted = harness.model(
            Realm::Member,
            AuthRule::ApprovedIdentities(vec!["Joe Bob".into()]),
            AuthTimeout::ONE_HOUR,
        );
        assert_eq!(
            unlisted.authorize(Some(&token), None).await,
            Err(AuthError::Forbidden)
        );
    }

    #[tokio::test]
    async fn machine_realm_policy_admits_machine_tokens() {
        let harness = Harness::new();
        let model = harness.model(Realm::Machine, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);
        let token = harness.key_store.mint_fake_machine_token().unwrap();

        let identity = model.authorize(Some(&token), None).await.unwrap();
        assert_eq!(identity.sub, FAKE_SERVICE_IDENTITY);
    }

    #[tokio::test]
    async fn impersonator_claim_is_propagated() {
        let harness = Harness::new();
        let model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);

        let mut claims = member_claims(chrono::Utc::now().timestamp());
        claims.impersonated_by = Some("csr-agent-17".into());
        let token = harness.sign(&claims);

        let identity = model.authorize(Some(&token), None).await.unwrap();
        assert_eq!(identity.sub, FAKE_MEMBER_IDENTITY);
        assert_eq!(identity.impersonated_by, "csr-agent-17");
        assert_eq!(
            identity.header_value(),
            format!("{FAKE_MEMBER_IDENTITY}:csr-agent-17")
        );
    }

    #[tokio::test]
    async fn garbage_tokens_are_unauthorized() {
        let harness = Harness::new();
        let model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);

        assert_eq!(
            model.authorize(Some("not-a-jwt"), None).await,
            Err(AuthError::Unauthorized)
        );
        assert_eq!(
            model.authorize(Some("a.b.c"), None).await,
            Err(AuthError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn failed_policy_addition_leaves_the_model_unchanged() {
        let harness = Harness::new();
        let mut model = harness.model(Realm::Member, AuthRule::ValidIdentity, AuthTimeout::ONE_HOUR);

        let before = model.policies().len();
        let err = model.add_policy(
            Realm::Member,
            AuthRule::MatchingIdentity,
            AuthTimeout::ONE_DAY, // diverging timeout for the same realm
        );
        assert!(err.is_err());
        assert_eq!(model.policies().len(), before);
    }
}
