//! A per-site content-addressed store of [`workflow::Asset`]s, gated by
//! policy on every read.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use identifier::Identifier;
use log::info;
use policy::NamespaceResolver;
use tokio::sync::RwLock;
use workflow::Asset;

/// Failure modes of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no asset with id '{0}' is stored here")]
    NotFound(Identifier),
    #[error("asset '{0}' already exists with a different payload")]
    DuplicateAsset(Identifier),
    #[error("'{requester}' may not access asset '{id}'")]
    AccessDenied { id: Identifier, requester: Identifier },
    #[error("policy error: {0}")]
    Policy(#[from] policy::PolicyError),
}

/// A site-local store of data and compute assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores `asset`. Idempotent by identifier: storing the exact same
    /// asset twice is a no-op; storing a
    /// different payload under an id already in use is `DuplicateAsset`.
    async fn store(&self, asset: Asset) -> Result<(), StoreError>;

    /// Retrieves `id` on behalf of `requester`, checking access before
    /// returning anything.
    async fn retrieve(&self, id: &Identifier, requester: &Identifier) -> Result<Asset, StoreError>;
}

/// The reference, in-memory [`AssetStore`].
pub struct InMemoryAssetStore {
    assets: RwLock<HashMap<Identifier, Asset>>,
    resolver: Arc<dyn NamespaceResolver>,
}

impl InMemoryAssetStore {
    pub fn new(resolver: Arc<dyn NamespaceResolver>) -> Self { Self { assets: RwLock::new(HashMap::new()), resolver } }

    /// Re-evaluates `asset.metadata`'s governing policy and checks whether
    /// `requester` may access it — fresh on every call, since the evaluator
    /// is a pure function of current rules and nothing here is cached
    /// across requests.
    async fn may_access(&self, asset: &Asset, requester: &Identifier) -> Result<bool, StoreError> {
        let metadata = asset.metadata();
        let evaluated = match (&metadata.job, &metadata.item) {
            (Some(job), Some(_)) => policy::evaluate(job, self.resolver.as_ref()).await?,
            _ => policy::evaluate_primary(asset.id(), self.resolver.as_ref()).await?,
        };
        let item = metadata.item.as_deref().unwrap_or_else(|| asset.id().as_str());
        let perm = evaluated.get(item)?;
        Ok(evaluated.may_access(perm, requester))
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn store(&self, asset: Asset) -> Result<(), StoreError> {
        let mut assets = self.assets.write().await;
        match assets.get(asset.id()) {
            None => {
                assets.insert(asset.id().clone(), asset);
                Ok(())
            },
            Some(existing) if existing == &asset => {
                info!("asset store: duplicate insert of '{}', no-op", asset.id());
                Ok(())
            },
            Some(_) => Err(StoreError::DuplicateAsset(asset.id().clone())),
        }
    }

    async fn retrieve(&self, id: &Identifier, requester: &Identifier) -> Result<Asset, StoreError> {
        info!("asset store: servicing request from '{requester}' for '{id}'");
        let asset = self.assets.read().await.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if !self.may_access(&asset, requester).await? {
            return Err(StoreError::AccessDenied { id: id.clone(), requester: requester.clone() });
        }
        info!("asset store: sending asset '{id}' to '{requester}'");
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use identifier::Identifier;
    use policy::{IdPattern, PolicyError, PolicySource, Rule};
    use workflow::{DataAsset, Metadata};

    use super::*;

    struct StaticSource(Vec<Rule>);

    #[async_trait]
    impl PolicySource for StaticSource {
        async fn rules_for(&self, _namespace: &str) -> Result<Vec<Rule>, PolicyError> { Ok(self.0.clone()) }
    }

    struct StaticResolver(Arc<StaticSource>);

    #[async_trait]
    impl NamespaceResolver for StaticResolver {
        async fn policy_source_for(&self, _namespace: &str) -> Result<Arc<dyn PolicySource>, PolicyError> { Ok(self.0.clone()) }
    }

    fn primary_asset() -> Asset {
        Asset::Data(DataAsset { id: Identifier::parse("asset:ns1:x:ns1:s1").unwrap(), data: serde_json::json!([1, 2, 3]), metadata: Metadata::primary() })
    }

    #[tokio::test]
    async fn retrieve_denies_without_a_grant() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(vec![]))));
        let store = InMemoryAssetStore::new(resolver);
        store.store(primary_asset()).await.unwrap();

        let err = store.retrieve(&Identifier::parse("asset:ns1:x:ns1:s1").unwrap(), &Identifier::parse("party:ns1:p1").unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn retrieve_succeeds_with_a_direct_grant() {
        let rules = vec![Rule::MayAccess {
            asset_or_collection: IdPattern::parse("asset:ns1:x:ns1:s1"),
            party_or_collection: IdPattern::parse("party:ns1:p1"),
        }];
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules))));
        let store = InMemoryAssetStore::new(resolver);
        store.store(primary_asset()).await.unwrap();

        let asset = store.retrieve(&Identifier::parse("asset:ns1:x:ns1:s1").unwrap(), &Identifier::parse("party:ns1:p1").unwrap()).await.unwrap();
        assert_eq!(asset.id(), &Identifier::parse("asset:ns1:x:ns1:s1").unwrap());
    }

    #[tokio::test]
    async fn duplicate_insert_of_same_payload_is_a_no_op() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(vec![]))));
        let store = InMemoryAssetStore::new(resolver);
        store.store(primary_asset()).await.unwrap();
        store.store(primary_asset()).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_insert_of_different_payload_is_an_error() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(vec![]))));
        let store = InMemoryAssetStore::new(resolver);
        store.store(primary_asset()).await.unwrap();

        let mut other = primary_asset();
        if let Asset::Data(d) = &mut other {
            d.data = serde_json::json!([9, 9, 9]);
        }
        let err = store.store(other).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAsset(_)));
    }

    #[tokio::test]
    async fn retrieve_missing_asset_is_not_found() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(vec![]))));
        let store = InMemoryAssetStore::new(resolver);
        let err = store.retrieve(&Identifier::parse("asset:ns1:x:ns1:s1").unwrap(), &Identifier::parse("party:ns1:p1").unwrap()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
