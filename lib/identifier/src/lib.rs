//! Typed names for every object that can cross a site boundary.
//!
//! An [`Identifier`] is a colon-separated string with a typed prefix (its
//! [`Kind`]). See the module-level docs on [`Kind`] for the six concrete
//! forms plus the wildcard.

use std::fmt;
use std::str::FromStr;

use enum_debug::EnumDebug;
use serde::{Deserialize, Serialize};

/// The kind of object an [`Identifier`] names.
///
/// Determines how many colon-separated parts the identifier has, and which
/// operations ([`Identifier::namespace`], [`Identifier::location`]) are
/// defined on it.
#[derive(Clone, Copy, Debug, EnumDebug, Eq, PartialEq, Hash)]
pub enum Kind {
    /// `party:<ns>:<name>`
    Party,
    /// `party_collection:<ns>:<name>`
    PartyCollection,
    /// `site:<ns>:<name>`
    Site,
    /// `asset:<ns>:<name>:<site_ns>:<site_name>`
    Asset,
    /// `asset_collection:<ns>:<name>`
    AssetCollection,
    /// `result:<hex_digest>`
    Result,
    /// The literal `*`, used only as a wildcard in policy rules.
    Wildcard,
}

impl Kind {
    fn tag(self) -> &'static str {
        match self {
            Self::Party => "party",
            Self::PartyCollection => "party_collection",
            Self::Site => "site",
            Self::Asset => "asset",
            Self::AssetCollection => "asset_collection",
            Self::Result => "result",
            Self::Wildcard => "*",
        }
    }

    /// Number of colon-separated parts a non-wildcard identifier of this kind has.
    fn arity(self) -> usize {
        match self {
            Self::Party | Self::PartyCollection | Self::Site | Self::AssetCollection => 3,
            Self::Asset => 5,
            Self::Result => 2,
            Self::Wildcard => 1,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "party" => Self::Party,
            "party_collection" => Self::PartyCollection,
            "site" => Self::Site,
            "asset" => Self::Asset,
            "asset_collection" => Self::AssetCollection,
            "result" => Self::Result,
            _ => return None,
        })
    }
}

/// Errors that can occur while constructing or inspecting an [`Identifier`].
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    #[error("unknown identifier kind '{0}'")]
    UnknownKind(String),
    #[error("identifier of kind '{kind}' must have {expected} parts, got {found} in '{raw}'")]
    WrongArity { kind: &'static str, expected: usize, found: usize, raw: String },
    #[error("invalid character in identifier part '{0}' (expected [A-Za-z0-9_.-]*)")]
    InvalidPart(String),
    #[error("'{0}' is not a concrete asset identifier, so it has no location")]
    NotLocatable(String),
    #[error("'{0}' is a result identifier, so it has no namespace")]
    NotNamespaced(String),
}

fn part_is_valid(part: &str) -> bool { part.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')) }

/// A value-typed, content-addressable name for a party, site, asset, asset
/// collection, derived result, or the `*` wildcard used in policy rules.
///
/// Structural equality and hashing are derived from the underlying string, so
/// two `Identifier`s parsed from the same text always compare equal.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    raw: String,
}

impl Identifier {
    /// Parses and validates `s` into an [`Identifier`].
    ///
    /// Validates the kind tag, the fixed part count for that kind, and that
    /// every part matches `[A-Za-z0-9_.-]*`.
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw = s.into();
        if raw == "*" {
            return Ok(Self { raw });
        }

        let parts: Vec<&str> = raw.split(':').collect();
        let tag = parts[0];
        let kind = Kind::from_tag(tag).ok_or_else(|| IdentifierError::UnknownKind(tag.to_string()))?;

        if parts.len() != kind.arity() {
            return Err(IdentifierError::WrongArity { kind: kind.tag(), expected: kind.arity(), found: parts.len(), raw });
        }
        for part in &parts {
            if !part_is_valid(part) {
                return Err(IdentifierError::InvalidPart((*part).to_string()));
            }
        }

        Ok(Self { raw })
    }

    /// Builds the `result:<id_hash>` identifier for a derived asset.
    ///
    /// `id_hash` must already be the lower-hex digest produced by the policy
    /// evaluator / job machinery (see `workflow::job::id_hash`); this
    /// function does not hash anything itself, it only validates and tags.
    pub fn from_id_hash(id_hash: impl AsRef<str>) -> Result<Self, IdentifierError> { Self::parse(format!("result:{}", id_hash.as_ref())) }

    /// Returns the single character `*`, the wildcard identifier used in rules.
    pub fn wildcard() -> Self { Self { raw: "*".to_string() } }

    #[inline]
    pub fn is_wildcard(&self) -> bool { self.raw == "*" }

    /// The kind of this identifier.
    pub fn kind(&self) -> Kind {
        if self.is_wildcard() {
            return Kind::Wildcard;
        }
        // Unwrap is safe: construction already validated the tag.
        Kind::from_tag(self.parts()[0]).expect("Identifier invariant violated: unknown kind slipped through parse()")
    }

    fn parts(&self) -> Vec<&str> { self.raw.split(':').collect() }

    /// The namespace this identifier lives in.
    ///
    /// # Errors
    /// Returns [`IdentifierError::NotNamespaced`] for `result:` identifiers
    /// and the wildcard, neither of which carry a namespace.
    pub fn namespace(&self) -> Result<&str, IdentifierError> {
        match self.kind() {
            Kind::Result | Kind::Wildcard => Err(IdentifierError::NotNamespaced(self.raw.clone())),
            _ => Ok(self.parts()[1]),
        }
    }

    /// The site storing this asset, for a concrete `asset:` identifier.
    ///
    /// # Errors
    /// Returns [`IdentifierError::NotLocatable`] for anything but a concrete
    /// `asset:<ns>:<name>:<site_ns>:<site_name>` identifier.
    pub fn location(&self) -> Result<Identifier, IdentifierError> {
        if self.kind() != Kind::Asset {
            return Err(IdentifierError::NotLocatable(self.raw.clone()));
        }
        let parts = self.parts();
        // Re-parse through `parse` so the invariant (charset, arity) is re-checked, not just trusted.
        Identifier::parse(format!("site:{}:{}", parts[3], parts[4]))
    }

    /// The bare name segment (last `:`-separated part), for kinds that have one.
    pub fn name(&self) -> Option<&str> {
        match self.kind() {
            Kind::Wildcard | Kind::Result => None,
            Kind::Asset => self.parts().get(1).copied(),
            _ => self.parts().get(2).copied(),
        }
    }

    pub fn as_str(&self) -> &str { &self.raw }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.raw) }
}

impl FromStr for Identifier {
    type Err = IdentifierError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(value) }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self { value.raw }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_kind() {
        let cases = [
            "party:ns1:p1",
            "party_collection:ns1:scientists",
            "site:ns1:s1",
            "asset:ns1:x:ns1:s1",
            "asset_collection:ns1:c1",
            "result:deadbeef",
            "*",
        ];
        for raw in cases {
            let id = Identifier::parse(raw).unwrap();
            assert_eq!(id.to_string(), raw);
            let reparsed = Identifier::parse(id.to_string()).unwrap();
            assert_eq!(id, reparsed);
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Identifier::parse("party:ns1").is_err());
        assert!(Identifier::parse("asset:ns1:x:ns1").is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(Identifier::parse("party:ns1:p/1").is_err());
        assert!(Identifier::parse("party:n s1:p1").is_err());
    }

    #[test]
    fn rejects_unknown_kind() { assert!(Identifier::parse("domain:ns1:p1").is_err()); }

    #[test]
    fn namespace_and_location() {
        let asset = Identifier::parse("asset:ns1:x:ns2:s1").unwrap();
        assert_eq!(asset.namespace().unwrap(), "ns1");
        assert_eq!(asset.location().unwrap(), Identifier::parse("site:ns2:s1").unwrap());

        let result = Identifier::from_id_hash("deadbeef").unwrap();
        assert!(result.namespace().is_err());
        assert!(result.location().is_err());

        let site = Identifier::parse("site:ns1:s1").unwrap();
        assert!(site.location().is_err());
    }

    #[test]
    fn wildcard_has_no_namespace_or_location() {
        let w = Identifier::wildcard();
        assert!(w.is_wildcard());
        assert!(w.namespace().is_err());
        assert!(w.location().is_err());
    }
}
