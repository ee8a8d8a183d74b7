//! The rule vocabulary a [`crate::PolicySource`] hands back, and the
//! wildcard-aware pattern matching that underlies every rule.
//!
//! A pattern is looser than an [`Identifier`]: its kind tag must match
//! exactly, but any later part may be the literal `*`, and a pattern may
//! simply have fewer parts than the identifiers it's meant to match, in
//! which case every part past the end of the pattern is unconstrained.
//! `asset:ns1:*` therefore matches every asset in `ns1` regardless of name or
//! storing site, and `asset:ns1:identity:*:*` matches a compute asset named
//! `identity` in `ns1` wherever it's hosted.

use std::fmt;
use std::str::FromStr;

use enum_debug::EnumDebug;
use identifier::Identifier;
use serde::{Deserialize, Serialize};

/// A glob-like pattern over [`Identifier`] text, as used in rule arguments.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdPattern {
    parts: Vec<String>,
}

impl IdPattern {
    pub fn parse(s: impl Into<String>) -> Self { Self { parts: s.into().split(':').map(str::to_string).collect() } }

    /// The universal wildcard, matching every identifier of every kind.
    pub fn any() -> Self { Self::parse("*") }

    fn is_universal(&self) -> bool { self.parts.len() == 1 && self.parts[0] == "*" }

    /// Whether this pattern matches `id`.
    pub fn matches(&self, id: &Identifier) -> bool {
        if self.is_universal() {
            return true;
        }
        let raw = id.as_str();
        let id_parts: Vec<&str> = raw.split(':').collect();
        if self.parts[0] != id_parts[0] {
            return false;
        }
        for (i, part) in self.parts.iter().enumerate().skip(1) {
            let Some(id_part) = id_parts.get(i) else { return false };
            if part != "*" && part != id_part {
                return false;
            }
        }
        true
    }

    /// Whether this pattern, used as a rule's `party_or_collection` target,
    /// covers `who`.
    ///
    /// Beyond plain [`IdPattern::matches`], a `party_collection` pattern
    /// whose name segment is wildcarded is treated as "every party in this
    /// namespace": there is no separate party-collection roster in this
    /// model, so namespace-scoped wildcarding is the only way a collection
    /// target can cover a concrete party.
    pub fn covers_party(&self, who: &Identifier) -> bool {
        if self.matches(who) {
            return true;
        }
        if self.parts.first().map(String::as_str) == Some("party_collection") && self.parts.get(2).map(String::as_str) == Some("*") {
            if let (Some(ns), Ok(who_ns)) = (self.parts.get(1), who.namespace()) {
                return ns == who_ns;
            }
        }
        false
    }
}

impl fmt::Display for IdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.parts.join(":")) }
}

impl FromStr for IdPattern {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(Self::parse(s)) }
}

impl TryFrom<String> for IdPattern {
    type Error = std::convert::Infallible;
    fn try_from(value: String) -> Result<Self, Self::Error> { Ok(Self::parse(value)) }
}

impl From<IdPattern> for String {
    fn from(value: IdPattern) -> Self { value.to_string() }
}

/// The four rule shapes a namespace's policy source may hand back.
///
/// Signature and provenance checking happen at ingestion, before a rule ever
/// reaches a [`crate::PolicySource`] — by the time the
/// evaluator sees a `Rule`, it is already trusted.
#[derive(Clone, Debug, EnumDebug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// An asset (or asset collection) may be accessed by a party (or party collection).
    MayAccess { asset_or_collection: IdPattern, party_or_collection: IdPattern },
    /// Any result derived from a member of `collection` that matches `data_pattern` stays a member of `collection`.
    ResultOfDataIn { data_pattern: IdPattern, collection: IdPattern },
    /// Any result computed by a compute asset matching `compute_pattern` is a member of `collection`.
    ResultOfComputeIn { compute_pattern: IdPattern, collection: IdPattern },
    /// A whole collection may be accessed by a party (or party collection).
    MayAccessCollection { collection: IdPattern, party_or_collection: IdPattern },
}

impl registry::Keyed for Rule {
    /// A rule has no identifier of its own, so its canonical JSON rendering
    /// stands in as its replication key — two rules key-equal iff they are
    /// the same rule.
    fn key(&self) -> String { serde_json::to_string(self).expect("Rule is always JSON-serializable") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_wildcard_covers_any_asset_in_namespace() {
        let p = IdPattern::parse("asset:ns1:*");
        assert!(p.matches(&Identifier::parse("asset:ns1:x:ns1:s1").unwrap()));
        assert!(!p.matches(&Identifier::parse("asset:ns2:x:ns1:s1").unwrap()));
    }

    #[test]
    fn inner_wildcard_leaves_trailing_parts_unconstrained() {
        let p = IdPattern::parse("asset:ns1:identity:*:*");
        assert!(p.matches(&Identifier::parse("asset:ns1:identity:ns1:s1").unwrap()));
        assert!(p.matches(&Identifier::parse("asset:ns1:identity:ns2:s2").unwrap()));
        assert!(!p.matches(&Identifier::parse("asset:ns1:other:ns1:s1").unwrap()));
    }

    #[test]
    fn universal_wildcard_matches_every_kind() {
        let p = IdPattern::any();
        assert!(p.matches(&Identifier::parse("party:ns1:p1").unwrap()));
        assert!(p.matches(&Identifier::from_id_hash("deadbeef").unwrap()));
    }

    #[test]
    fn party_collection_namespace_wildcard_covers_party() {
        let p = IdPattern::parse("party_collection:ns1:*");
        assert!(p.covers_party(&Identifier::parse("party:ns1:p1").unwrap()));
        assert!(!p.covers_party(&Identifier::parse("party:ns2:p1").unwrap()));
    }
}
