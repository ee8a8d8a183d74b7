//! Convenience read-side queries over a registry replica, mirroring
//! `registry_client.py`'s `RegistryClient`: sites are looked up so often by id, namespace or runner
//! capability that every caller would otherwise re-implement this scan.

use std::sync::Arc;

use identifier::Identifier;

use crate::error::RegistryError;
use crate::objects::{Party, RegisteredObject, Site};
use crate::replication::Replica;

pub struct RegistryClient {
    replica: Arc<Replica<RegisteredObject>>,
}

impl RegistryClient {
    pub fn new(replica: Arc<Replica<RegisteredObject>>) -> Self { Self { replica } }

    pub async fn update(&self) -> Result<(), RegistryError> {
        self.replica.update().await?;
        Ok(())
    }

    pub async fn get_site_by_id(&self, site_id: &Identifier) -> Result<Site, RegistryError> {
        self.replica.get(site_id.as_str()).await.and_then(|o| o.as_site().cloned()).ok_or_else(|| RegistryError::UnknownSite(site_id.to_string()))
    }

    pub async fn get_party_by_id(&self, party_id: &Identifier) -> Result<Party, RegistryError> {
        self.replica.get(party_id.as_str()).await.and_then(|o| o.as_party().cloned()).ok_or_else(|| RegistryError::UnknownParty(party_id.to_string()))
    }

    pub async fn list_sites_with_runners(&self) -> Vec<Site> {
        self.replica.objects().await.into_iter().filter_map(|o| o.as_site().cloned()).filter(|s| s.has_runner).collect()
    }

    /// The site that is the policy authority for `namespace`, if any.
    pub async fn site_for_namespace(&self, namespace: &str) -> Option<Site> {
        self.replica.objects().await.into_iter().filter_map(|o| o.as_site().cloned()).find(|s| s.namespace.as_deref() == Some(namespace))
    }

    /// The public key of the party that owns `namespace`'s authoritative site.
    pub async fn public_key_for_namespace(&self, namespace: &str) -> Result<String, RegistryError> {
        let site = self.site_for_namespace(namespace).await.ok_or_else(|| RegistryError::UnknownNamespace(namespace.to_string()))?;
        self.get_party_by_id(&site.owner_id).await.map(|p| p.public_key)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::objects::Site;
    use crate::store::Registry;

    #[tokio::test]
    async fn finds_site_by_namespace_after_update() {
        let registry = Registry::new(Duration::seconds(60));
        registry.register_party(Party { id: Identifier::parse("party:ns1:p1").unwrap(), public_key: "pk".to_string() }).await.unwrap();
        registry
            .register_site(Site {
                id: Identifier::parse("site:ns1:s1").unwrap(),
                owner_id: Identifier::parse("party:ns1:p1").unwrap(),
                admin_id: Identifier::parse("party:ns1:p1").unwrap(),
                endpoint: "http://localhost".to_string(),
                has_runner: true,
                has_store: true,
                namespace: Some("ns1".to_string()),
            })
            .await
            .unwrap();

        let replica = Arc::new(Replica::new(Arc::new(registry.replication_server())));
        replica.update().await.unwrap();
        let client = RegistryClient::new(replica);

        let site = client.site_for_namespace("ns1").await.unwrap();
        assert_eq!(site.id, Identifier::parse("site:ns1:s1").unwrap());
        assert_eq!(client.public_key_for_namespace("ns1").await.unwrap(), "pk");
    }
}
