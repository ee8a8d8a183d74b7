//! Resolves a namespace to its [`PolicySource`]: the namespace this site
//! itself hosts (if any) is served straight out of its own canonical store,
//! every other namespace named in `policy_sources` is served from a live
//! HTTP-backed replica.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use policy::{NamespaceResolver, PolicyError, PolicySource, ReplicaPolicySource, Rule};
use registry::{CanonicalStore, RegistryError, Replica, ReplicationServer};
use tokio::sync::RwLock;

use crate::http_client::HttpUpdateSource;

/// Serves one namespace's rules straight out of a [`CanonicalStore`] this
/// site itself owns — the counterpart to `ReplicaPolicySource` for the one
/// namespace (if any) a site is the authority for.
struct LocalPolicySource {
    namespace: String,
    store: Arc<CanonicalStore<Rule>>,
}

#[async_trait]
impl PolicySource for LocalPolicySource {
    async fn rules_for(&self, namespace: &str) -> Result<Vec<Rule>, PolicyError> {
        if namespace != self.namespace {
            return Err(PolicyError::UnknownNamespace(namespace.to_string()));
        }
        Ok(self.store.objects().await)
    }
}

/// A [`NamespaceResolver`] built from a site's own configuration: it already
/// knows which URL serves which namespace's rules, so it never needs to ask
/// the registry for that mapping.
pub struct SiteNamespaceResolver {
    hosted: Option<LocalPolicySource>,
    foreign: RwLock<BTreeMap<String, Arc<ReplicaPolicySource>>>,
    policy_sources: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl SiteNamespaceResolver {
    pub fn new(policy_sources: BTreeMap<String, String>, client: reqwest::Client, hosted: Option<(String, Arc<CanonicalStore<Rule>>)>) -> Self {
        Self {
            hosted: hosted.map(|(namespace, store)| LocalPolicySource { namespace, store }),
            foreign: RwLock::new(BTreeMap::new()),
            policy_sources,
            client,
        }
    }
}

#[async_trait]
impl NamespaceResolver for SiteNamespaceResolver {
    async fn policy_source_for(&self, namespace: &str) -> Result<Arc<dyn PolicySource>, PolicyError> {
        if let Some(local) = &self.hosted {
            if local.namespace == namespace {
                return Ok(Arc::new(LocalPolicySource { namespace: local.namespace.clone(), store: local.store.clone() }));
            }
        }

        if let Some(existing) = self.foreign.read().await.get(namespace) {
            return Ok(existing.clone() as Arc<dyn PolicySource>);
        }

        let url = self.policy_sources.get(namespace).ok_or_else(|| PolicyError::UnknownNamespace(namespace.to_string()))?;
        let source: Arc<dyn registry::UpdateSource<Rule>> = Arc::new(HttpUpdateSource::new(self.client.clone(), url.clone()));
        let replica = Arc::new(Replica::new(source));
        let policy_source = Arc::new(ReplicaPolicySource::new(namespace, replica));
        self.foreign.write().await.insert(namespace.to_string(), policy_source.clone());
        Ok(policy_source as Arc<dyn PolicySource>)
    }
}

/// Seeds a fresh [`ReplicationServer`] for the namespace this site hosts, if
/// any, so `SiteSrv::with_policy_server` has something to serve immediately.
///
/// Fails on the first rule that does not seed cleanly (e.g. a duplicate id in
/// `rules`) rather than silently dropping it.
pub async fn build_hosted_server(rules: Vec<Rule>, lease: chrono::Duration) -> Result<(Arc<CanonicalStore<Rule>>, ReplicationServer<Rule>), RegistryError> {
    let store = Arc::new(CanonicalStore::new(lease));
    for rule in rules {
        store.insert(rule).await?;
    }
    let server = store.replication_server();
    Ok((store, server))
}
