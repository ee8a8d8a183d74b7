//! The two kinds of object the canonical registry holds.
//!
//! The original proof of concept tells `PartyDescription` and
//! `SiteDescription` apart with `isinstance` checks wherever it consumes a
//! `RegisteredObject`; here they're
//! a single tagged enum with exhaustive matches at every use site instead.

use enum_debug::EnumDebug;
use identifier::Identifier;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// An organisational principal, identified by its own `party:` identifier.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: Identifier,
    /// PEM-encoded public key used to verify this party's rule signatures.
    /// Verification itself happens at rule ingestion, outside this crate
    ///.
    pub public_key: String,
}

/// A network endpoint owned and administered by parties.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: Identifier,
    pub owner_id: Identifier,
    pub admin_id: Identifier,
    pub endpoint: String,
    pub has_runner: bool,
    pub has_store: bool,
    /// The namespace this site's policy server is the authority for, if any.
    pub namespace: Option<String>,
}

impl Site {
    /// Validates the `has_runner ⇒ has_store` invariant.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.has_runner && !self.has_store {
            return Err(RegistryError::RunnerNeedsStore(self.id.to_string()));
        }
        Ok(())
    }
}

/// Either kind of object the canonical store holds.
#[derive(Clone, Debug, Eq, PartialEq, EnumDebug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegisteredObject {
    Party(Party),
    Site(Site),
}

impl RegisteredObject {
    pub fn id(&self) -> &Identifier {
        match self {
            Self::Party(p) => &p.id,
            Self::Site(s) => &s.id,
        }
    }

    pub fn as_party(&self) -> Option<&Party> {
        match self {
            Self::Party(p) => Some(p),
            Self::Site(_) => None,
        }
    }

    pub fn as_site(&self) -> Option<&Site> {
        match self {
            Self::Site(s) => Some(s),
            Self::Party(_) => None,
        }
    }
}

impl crate::replication::Keyed for RegisteredObject {
    fn key(&self) -> String { self.id().to_string() }
}
