//! Realm-scoped authorization policies.
//!
//! A policy is a `(realm, rule, timeout)` tuple. The approved list only
//! exists on the two rules that consult one, so "list on the wrong rule" is
//! unrepresentable; the remaining validity rules are enforced when a policy
//! is added to a model (see [`validate_addition`]).

use thiserror::Error;

use crate::realm::Realm;

/// Token freshness window in seconds, measured from the `iat` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthTimeout(i64);

impl AuthTimeout {
    /// Sentinel: no freshness window. Only valid together with
    /// [`AuthRule::NoAuth`] and [`Realm::NoRealm`].
    pub const NO_EXPIRY: AuthTimeout = AuthTimeout(0);
    pub const ONE_HOUR: AuthTimeout = AuthTimeout(3600);
    pub const ONE_DAY: AuthTimeout = AuthTimeout(86400);

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(&self) -> i64 {
        self.0
    }
}

/// How a realm-matching token is authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRule {
    /// Anonymous passthrough. Must be the only policy in a model.
    NoAuth,
    /// Any authenticated identity in the realm.
    ValidIdentity,
    /// The `identityId` URL path variable must equal the token's `sub`.
    MatchingIdentity,
    /// Any of the token's `roles` strings must appear in the list.
    ApprovedGroups(Vec<String>),
    /// The token's `sub` must appear in the list.
    ApprovedIdentities(Vec<String>),
}

impl AuthRule {
    pub fn is_no_auth(&self) -> bool {
        matches!(self, AuthRule::NoAuth)
    }
}

/// One entry in an auth model's ordered policy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    pub realm: Realm,
    pub rule: AuthRule,
    pub timeout: AuthTimeout,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid policy - {0}")]
    Invalid(String),
}

impl PolicyError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Check whether `candidate` may be appended to `existing`.
///
/// The rules:
/// 1. `NoRealm`, `NoAuth`, and `NoExpiry` travel together, and a `NoAuth`
///    policy must be the only policy in the model.
/// 2. `ApprovedGroups` / `ApprovedIdentities` require a non-empty list.
/// 3. All policies sharing a realm must share a timeout.
/// 4. `NoAuth` never mixes with other policies, in either order.
///
/// A failed addition leaves the model untouched.
pub fn validate_addition(
    existing: &[AuthPolicy],
    candidate: &AuthPolicy,
) -> Result<(), PolicyError> {
    let no_realm = candidate.realm == Realm::NoRealm;
    let no_auth = candidate.rule.is_no_auth();
    let no_expiry = candidate.timeout == AuthTimeout::NO_EXPIRY;

    if no_realm || no_auth || no_expiry {
        if !(no_realm && no_auth && no_expiry) {
            return Err(PolicyError::invalid(
                "NoAuth can only be used with NoRealm and NoExpiry",
            ));
        }
        if !existing.is_empty() {
            return Err(PolicyError::invalid(
                "NoRealm, NoAuth, and NoExpiry must be the only policy when in use",
            ));
        }
        return Ok(());
    }

    if existing.iter().any(|p| p.rule.is_no_auth()) {
        return Err(PolicyError::invalid(
            "NoAuth cannot be used with any other policies",
        ));
    }

    match &candidate.rule {
        AuthRule::ApprovedGroups(list) | AuthRule::ApprovedIdentities(list) => {
            if list.is_empty() {
                return Err(PolicyError::invalid(
                    "ApprovedGroups and ApprovedIdentities must have a non-empty list",
                ));
            }
        }
        _ => {}
    }

    for policy in existing {
        if policy.realm == candidate.realm && policy.timeout != candidate.timeout {
            return Err(PolicyError::invalid(format!(
                "all timeout values must match for a given realm: realm {} timeout {} differs from previous timeout {}",
                candidate.realm,
                candidate.timeout.as_secs(),
                policy.timeout.as_secs()
            )));
        }
    }

    Ok(())
}
