//! Retrieval of an asset that may live at another site.
//!
//! This crate never speaks HTTP itself: [`AssetFetcher`] is the seam a deployment plugs a real
//! site-to-site client into. Tests and same-process wiring can implement it
//! directly against an [`asset_store::AssetStore`].

use async_trait::async_trait;
use identifier::Identifier;
use workflow::Asset;

use crate::error::RunnerError;

/// Retrieves an asset on behalf of `requester`, wherever `site` says it lives.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn retrieve(&self, site: &Identifier, id: &Identifier, requester: &Identifier) -> Result<Asset, RunnerError>;
}
