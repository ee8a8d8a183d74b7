//! The canonical registry: a [`CanonicalStore`] of [`RegisteredObject`]s plus
//! the party/site-specific invariants layered on top.

use chrono::Duration;
use identifier::Identifier;

use crate::error::RegistryError;
use crate::objects::{Party, RegisteredObject, Site};
use crate::replication::{CanonicalStore, ReplicationServer};

pub struct Registry {
    store: CanonicalStore<RegisteredObject>,
}

impl Registry {
    pub fn new(lease: Duration) -> Self { Self { store: CanonicalStore::new(lease) } }

    pub async fn register_party(&self, party: Party) -> Result<u64, RegistryError> {
        self.reject_duplicate_name(party.id.name(), &party.id, |o| o.as_party().map(|p| &p.id)).await?;
        self.store.insert(RegisteredObject::Party(party)).await
    }

    pub async fn deregister_party(&self, id: &Identifier) -> Result<u64, RegistryError> { self.store.delete(id.as_str()).await }

    pub async fn register_site(&self, site: Site) -> Result<u64, RegistryError> {
        site.validate()?;
        if self.store.get(site.owner_id.as_str()).await.is_none() {
            return Err(RegistryError::UnknownParty(site.owner_id.to_string()));
        }
        if self.store.get(site.admin_id.as_str()).await.is_none() {
            return Err(RegistryError::UnknownParty(site.admin_id.to_string()));
        }
        self.reject_duplicate_name(site.id.name(), &site.id, |o| o.as_site().map(|s| &s.id)).await?;
        self.store.insert(RegisteredObject::Site(site)).await
    }

    pub async fn deregister_site(&self, id: &Identifier) -> Result<u64, RegistryError> { self.store.delete(id.as_str()).await }

    pub async fn get_party(&self, id: &Identifier) -> Option<Party> { self.store.get(id.as_str()).await.and_then(|o| o.as_party().cloned()) }

    pub async fn get_site(&self, id: &Identifier) -> Option<Site> { self.store.get(id.as_str()).await.and_then(|o| o.as_site().cloned()) }

    pub async fn objects(&self) -> Vec<RegisteredObject> { self.store.objects().await }

    pub fn replication_server(&self) -> ReplicationServer<RegisteredObject> { self.store.replication_server() }

    /// Rejects `id` if another object of the same kind is already
    /// registered under the same bare name, even in a different namespace:
    /// names must be unique within a kind, identifiers only within a
    /// namespace.
    async fn reject_duplicate_name(&self, name: Option<&str>, id: &Identifier, same_kind_id: impl Fn(&RegisteredObject) -> Option<&Identifier>) -> Result<(), RegistryError> {
        let Some(name) = name else { return Ok(()) };
        for object in self.store.objects().await {
            if same_kind_id(&object).is_some_and(|other| other != id && other.name() == Some(name)) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(id: &str) -> Party { Party { id: Identifier::parse(id).unwrap(), public_key: "pk".to_string() } }

    fn site(id: &str, owner: &str, admin: &str, runner: bool, store: bool) -> Site {
        Site {
            id: Identifier::parse(id).unwrap(),
            owner_id: Identifier::parse(owner).unwrap(),
            admin_id: Identifier::parse(admin).unwrap(),
            endpoint: "http://localhost".to_string(),
            has_runner: runner,
            has_store: store,
            namespace: Some("ns1".to_string()),
        }
    }

    #[tokio::test]
    async fn rejects_site_with_unregistered_owner() {
        let registry = Registry::new(Duration::seconds(1));
        let err = registry.register_site(site("site:ns1:s1", "party:ns1:p1", "party:ns1:p1", false, true)).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParty(_)));
    }

    #[tokio::test]
    async fn rejects_runner_without_store() {
        let registry = Registry::new(Duration::seconds(1));
        registry.register_party(party("party:ns1:p1")).await.unwrap();
        let err = registry.register_site(site("site:ns1:s1", "party:ns1:p1", "party:ns1:p1", true, false)).await.unwrap_err();
        assert!(matches!(err, RegistryError::RunnerNeedsStore(_)));
    }

    #[tokio::test]
    async fn rejects_reregistration_of_deregistered_id() {
        let registry = Registry::new(Duration::seconds(1));
        registry.register_party(party("party:ns1:p1")).await.unwrap();
        registry.deregister_party(&Identifier::parse("party:ns1:p1").unwrap()).await.unwrap();
        let err = registry.register_party(party("party:ns1:p1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_party_name_across_namespaces() {
        let registry = Registry::new(Duration::seconds(1));
        registry.register_party(party("party:ns1:p1")).await.unwrap();
        let err = registry.register_party(party("party:ns2:p1")).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_site_name_across_namespaces() {
        let registry = Registry::new(Duration::seconds(1));
        registry.register_party(party("party:ns1:p1")).await.unwrap();
        registry.register_site(site("site:ns1:s1", "party:ns1:p1", "party:ns1:p1", false, false)).await.unwrap();
        let err = registry.register_site(site("site:ns2:s1", "party:ns1:p1", "party:ns1:p1", false, false)).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }
}
