//! Caller realms.
//!
//! A realm is the logical class of caller carried in the token's `sub_type`
//! claim. The set is closed; a token whose `sub_type` is not one of these
//! strings simply matches no policy.

use std::fmt;

/// Logical class of caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    /// Sentinel used only by the anonymous (`NoAuth`) policy.
    NoRealm,
    Machine,
    Member,
    Partner,
    Internal,
    CustomerServiceRep,
    Operations,
}

impl Realm {
    /// The wire string as it appears in the `sub_type` claim.
    pub fn as_str(&self) -> &'static str {
        match self {
            Realm::NoRealm => "NoRealm",
            Realm::Machine => "Machine",
            Realm::Member => "Member",
            Realm::Partner => "Partner",
            Realm::Internal => "Internal",
            Realm::CustomerServiceRep => "CustomerServiceRep",
            Realm::Operations => "Operations",
        }
    }

    /// Whether this realm's wire string equals the given `sub_type` claim.
    pub fn matches_claim(&self, sub_type: &str) -> bool {
        self.as_str() == sub_type
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
