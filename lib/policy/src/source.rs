//! Pluggable discovery of, and access to, a namespace's rule set.
//!
//! The evaluator itself never decides where rules come from: it asks a
//! [`NamespaceResolver`] (typically backed by a registry replica) for the
//! [`PolicySource`] that owns a given namespace, then asks that source for
//! its rules. Swapping in a mock of either trait is enough to unit-test the
//! evaluator without a running registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::rule::Rule;

/// Failure modes of policy resolution and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("no policy source is registered for namespace '{0}'")]
    UnknownNamespace(String),
    #[error("rule source for namespace '{0}' returned a malformed rule: {1}")]
    MalformedRule(String, String),
    #[error("item '{0}' is not part of this job's workflow")]
    UndefinedItem(String),
    #[error("identifier error: {0}")]
    Identifier(#[from] identifier::IdentifierError),
}

/// Hands back every rule a single namespace's authority has issued.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn rules_for(&self, namespace: &str) -> Result<Vec<Rule>, PolicyError>;
}

/// Maps a namespace to the [`PolicySource`] that speaks for it.
#[async_trait]
pub trait NamespaceResolver: Send + Sync {
    async fn policy_source_for(&self, namespace: &str) -> Result<Arc<dyn PolicySource>, PolicyError>;
}
