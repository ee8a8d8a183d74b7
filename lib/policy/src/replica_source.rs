//! A [`PolicySource`] backed by a [`registry::Replica`] of rules — how a
//! site actually answers "what are this namespace's rules" once it's
//! polling another site's policy server, rather than holding the rule set
//! itself.

use std::sync::Arc;

use async_trait::async_trait;
use registry::Replica;

use crate::rule::Rule;
use crate::source::{PolicyError, PolicySource};

/// Serves one namespace's rules out of a live [`Replica<Rule>`].
///
/// A replica mirrors exactly one origin's rule set, so this source only ever
/// answers for the one `namespace` it was built with — asking it about any
/// other namespace is a caller error, not a missing-data one.
pub struct ReplicaPolicySource {
    namespace: String,
    replica: Arc<Replica<Rule>>,
}

impl ReplicaPolicySource {
    pub fn new(namespace: impl Into<String>, replica: Arc<Replica<Rule>>) -> Self { Self { namespace: namespace.into(), replica } }
}

#[async_trait]
impl PolicySource for ReplicaPolicySource {
    async fn rules_for(&self, namespace: &str) -> Result<Vec<Rule>, PolicyError> {
        if namespace != self.namespace {
            return Err(PolicyError::UnknownNamespace(namespace.to_string()));
        }
        self.replica.update().await.map_err(|err| PolicyError::MalformedRule(namespace.to_string(), err.to_string()))?;
        Ok(self.replica.objects().await)
    }
}
