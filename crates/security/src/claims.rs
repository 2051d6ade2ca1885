//! JWT claims model and the propagated caller identity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request header carrying the authenticated caller for downstream handlers
/// and the resource store: `"<sub>:<impersonatedBy or empty>"`.
pub const AUTH_TOKEN_HEADER: &str = "X-AuthToken";

/// The claims a noun service understands.
///
/// `sub`, `sub_type`, and `iat` are required on the wire; the rest are
/// optional. `roles` is held as raw JSON values because authorization skips
/// non-string entries rather than rejecting the whole token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject / principal identifier.
    pub sub: String,
    /// Caller realm.
    pub sub_type: String,
    /// Friendly display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_name: Option<String>,
    /// Issued-at, seconds since epoch. Freshness is measured from here.
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<serde_json::Value>>,
    /// Secondary identity acting on behalf of `sub` (e.g. a customer-service
    /// agent); audited alongside the subject.
    #[serde(rename = "impersonatedBy", skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<String>,
}

impl Claims {
    /// The `roles` entries that are strings; anything else is skipped.
    pub fn string_roles(&self) -> impl Iterator<Item = &str> {
        self.roles
            .iter()
            .flatten()
            .filter_map(|value| value.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("token must have 3 dot-separated parts")]
    Malformed,

    #[error("failed to decode token payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to parse token claims: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Decode the claims segment without verifying the signature.
///
/// Used to read `sub_type` and `iat` so the freshness window can be chosen
/// before the verification key is even fetched. Signature verification always
/// follows; nothing from here is trusted on its own.
pub fn decode_claims_unverified(token: &str) -> Result<Claims, ClaimsError> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimsError::Malformed);
    };

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&payload_bytes)?)
}

/// The authenticated caller, threaded from the auth gate to handlers and the
/// resource store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthIdentity {
    pub sub: String,
    /// Empty when the caller acts as themselves.
    pub impersonated_by: String,
}

impl AuthIdentity {
    pub fn new(sub: impl Into<String>, impersonated_by: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            impersonated_by: impersonated_by.into(),
        }
    }

    /// Identity attached to requests accepted by a `NoAuth` policy.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            sub: claims.sub.clone(),
            impersonated_by: claims.impersonated_by.clone().unwrap_or_default(),
        }
    }

    /// Render as the `X-AuthToken` header value.
    pub fn header_value(&self) -> String {
        format!("{}:{}", self.sub, self.impersonated_by)
    }

    /// Parse an `X-AuthToken` header value. A missing impersonator segment
    /// parses as empty.
    pub fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some((sub, impersonated_by)) => Self::new(sub, impersonated_by),
            None => Self::new(value, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_roles_skips_non_strings() {
        let claims = Claims {
            sub: "abc".into(),
            sub_type: "Member".into(),
            sub_name: None,
            iat: 0,
            iss: None,
            jti: None,
            roles: Some(vec![json!("admin"), json!(42), json!(["nested"]), json!("ops")]),
            impersonated_by: None,
        };

        let roles: Vec<&str> = claims.string_roles().collect();
        assert_eq!(roles, vec!["admin", "ops"]);
    }

    #[test]
    fn unverified_decode_reads_payload() {
        let payload = json!({
            "sub": "GUID-fake-member-GUID",
            "sub_type": "Member",
            "iat": 1_744_249_713_i64,
        });
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        let token = format!("e30.{encoded}.sig");

        let claims = decode_claims_unverified(&token).unwrap();
        assert_eq!(claims.sub, "GUID-fake-member-GUID");
        assert_eq!(claims.sub_type, "Member");
        assert_eq!(claims.iat, 1_744_249_713);
    }

    #[test]
    fn unverified_decode_rejects_wrong_part_count() {
        assert!(decode_claims_unverified("only.two").is_err());
        assert!(decode_claims_unverified("a.b.c.d").is_err());
    }

    #[test]
    fn auth_identity_round_trips_through_header_form() {
        let identity = AuthIdentity::new("member-1", "csr-7");
        assert_eq!(identity.header_value(), "member-1:csr-7");
        assert_eq!(AuthIdentity::parse(&identity.header_value()), identity);

        let solo = AuthIdentity::new("member-1", "");
        assert_eq!(solo.header_value(), "member-1:");
        assert_eq!(AuthIdentity::parse("member-1:"), solo);
        assert_eq!(AuthIdentity::parse("member-1"), solo);
    }
}
