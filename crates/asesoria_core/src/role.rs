//! Role tiers and the business-identifier classifier
//!
//! A user's role is derived from their business identifier (RFC). The rules
//! live in a single ordered table so that adding a tier is one entry here plus
//! one enum variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Privilege tier governing who may open conversations with whom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Usuario,
    Asesor,
    Consultor,
}

/// How a business identifier is matched against a rule
#[derive(Debug, Clone, Copy)]
enum Matcher {
    Prefix(&'static str),
    Exact(&'static str),
}

impl Matcher {
    fn matches(&self, business_id: &str) -> bool {
        match self {
            Matcher::Prefix(prefix) => business_id.starts_with(prefix),
            Matcher::Exact(value) => business_id == *value,
        }
    }
}

/// Sentinel identifier of the platform administrator account
pub const ADMIN_BUSINESS_ID: &str = "ADMIN000CONS";

/// Classification rules, first match wins. Anything unmatched is `Usuario`.
const RULES: &[(Matcher, Role)] = &[
    (Matcher::Prefix("CONS"), Role::Consultor),
    (Matcher::Exact(ADMIN_BUSINESS_ID), Role::Consultor),
    (Matcher::Prefix("ADV"), Role::Asesor),
];

impl Role {
    /// Every tier, in ascending privilege order
    pub const ALL: [Role; 3] = [Role::Usuario, Role::Asesor, Role::Consultor];

    /// Derive the role for a business identifier. Pure and total.
    pub fn classify(business_id: &str) -> Role {
        RULES
            .iter()
            .find(|(matcher, _)| matcher.matches(business_id))
            .map(|(_, role)| *role)
            .unwrap_or(Role::Usuario)
    }

    /// Interpret a persisted role value.
    ///
    /// Returns `None` for absent or unrecognized values (including legacy
    /// values such as `"user"` or `"admin"`); callers fall back to the
    /// classifier in that case.
    pub fn from_stored(value: Option<&str>) -> Option<Role> {
        value.and_then(|v| v.parse().ok())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Usuario => "usuario",
            Role::Asesor => "asesor",
            Role::Consultor => "consultor",
        }
    }
}

/// Shorthand for [`Role::classify`]
pub fn classify(business_id: &str) -> Role {
    Role::classify(business_id)
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Number of users per role. Every tier is always present, possibly with zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts(BTreeMap<Role, u64>);

impl RoleCounts {
    pub fn new() -> Self {
        Self(Role::ALL.into_iter().map(|role| (role, 0)).collect())
    }

    pub fn record(&mut self, role: Role) {
        self.add(role, 1);
    }

    pub fn add(&mut self, role: Role, count: u64) {
        *self.0.entry(role).or_insert(0) += count;
    }

    pub fn get(&self, role: Role) -> u64 {
        self.0.get(&role).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, u64)> + '_ {
        self.0.iter().map(|(role, count)| (*role, *count))
    }
}

impl Default for RoleCounts {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Role> for RoleCounts {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        let mut counts = RoleCounts::new();
        for role in iter {
            counts.record(role);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_known_identifiers() {
        assert_eq!(classify("CONS1234"), Role::Consultor);
        assert_eq!(classify("ADMIN000CONS"), Role::Consultor);
        assert_eq!(classify("ADV007"), Role::Asesor);
        assert_eq!(classify("USR001"), Role::Usuario);
        assert_eq!(classify(""), Role::Usuario);
    }

    #[test]
    fn test_classify_is_case_sensitive() {
        assert_eq!(classify("cons1234"), Role::Usuario);
        assert_eq!(classify("adv007"), Role::Usuario);
    }

    #[test]
    fn test_prefix_must_lead() {
        assert_eq!(classify("XCONS1"), Role::Usuario);
        assert_eq!(classify("XADV1"), Role::Usuario);
        // Only the exact sentinel is promoted, not lookalikes
        assert_eq!(classify("ADMIN000CONSX"), Role::Usuario);
        assert_eq!(classify("ADMIN001CONS"), Role::Usuario);
    }

    #[test]
    fn test_only_leading_prefix_counts() {
        assert_eq!(classify("CONSADV"), Role::Consultor);
        assert_eq!(classify("ADVCONS"), Role::Asesor);
    }

    #[test]
    fn test_classify_is_deterministic() {
        for id in ["CONS1", "ADV2", "RFC3", "", "ADMIN000CONS", "ñandú"] {
            assert_eq!(classify(id), classify(id));
        }
    }

    #[test]
    fn test_from_stored_treats_legacy_values_as_unknown() {
        assert_eq!(Role::from_stored(Some("asesor")), Some(Role::Asesor));
        assert_eq!(Role::from_stored(Some("user")), None);
        assert_eq!(Role::from_stored(Some("admin")), None);
        assert_eq!(Role::from_stored(Some("Consultor")), None);
        assert_eq!(Role::from_stored(None), None);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Role::Consultor).unwrap();
        assert_eq!(json, "\"consultor\"");
        let parsed: Role = serde_json::from_str("\"asesor\"").unwrap();
        assert_eq!(parsed, Role::Asesor);
    }

    #[test]
    fn test_role_counts_always_list_every_tier() {
        let counts: RoleCounts = [Role::Asesor, Role::Asesor].into_iter().collect();
        assert_eq!(counts.get(Role::Usuario), 0);
        assert_eq!(counts.get(Role::Asesor), 2);
        assert_eq!(counts.get(Role::Consultor), 0);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.iter().count(), 3);
    }
}
