//! The concrete cross-site transport: a thin `reqwest` layer realising the
//! abstract [`step_runner::AssetFetcher`] and [`registry::UpdateSource`]
//! seams against another site's or the registry's HTTP facade.
//! Schema validation of these payloads is left to `serde`; nothing here
//! second-guesses what the remote side sends.

use std::marker::PhantomData;

use async_trait::async_trait;
use identifier::Identifier;
use registry::{Event, RegistryError, UpdateSource, UpdatesResponse};
use reqwest::Client;
use serde::de::DeserializeOwned;
use step_runner::{AssetFetcher, RunnerError};
use workflow::Asset;

/// Looks up a site's `endpoint` and fetches `GET /assets/{id}` from it,
/// authenticating as `requester` via a bearer token carrying its identifier.
pub struct HttpAssetFetcher {
    client: Client,
    registry: registry::RegistryClient,
}

impl HttpAssetFetcher {
    pub fn new(client: Client, registry: registry::RegistryClient) -> Self { Self { client, registry } }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn retrieve(&self, site: &Identifier, id: &Identifier, requester: &Identifier) -> Result<Asset, RunnerError> {
        let remote = self.registry.get_site_by_id(site).await.map_err(|err| RunnerError::Other(err.to_string()))?;
        let url = format!("{}/assets/{id}", remote.endpoint.trim_end_matches('/'));

        let resp = self
            .client
            .get(&url)
            .bearer_auth(requester.as_str())
            .send()
            .await
            .map_err(|err| RunnerError::Other(format!("could not reach '{site}': {err}")))?;

        match resp.status() {
            reqwest::StatusCode::OK => resp.json::<Asset>().await.map_err(|err| RunnerError::Other(format!("'{site}' returned a malformed asset: {err}"))),
            reqwest::StatusCode::NOT_FOUND => Err(RunnerError::NotYetAvailable(id.clone())),
            reqwest::StatusCode::FORBIDDEN => Err(RunnerError::AccessDenied { site: site.clone(), id: id.clone(), requester: requester.clone() }),
            other => Err(RunnerError::Other(format!("'{site}' responded {other} to GET /assets/{id}"))),
        }
    }
}

/// Polls a remote `GET /updates?since={seq}` endpoint, deserializing the
/// response directly into the same [`UpdatesResponse`] a local
/// `ReplicationServer` would hand back.
pub struct HttpUpdateSource<T> {
    client: Client,
    endpoint: String,
    _item: PhantomData<T>,
}

impl<T> HttpUpdateSource<T> {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self { Self { client, endpoint: endpoint.into(), _item: PhantomData } }
}

#[async_trait]
impl<T: DeserializeOwned + Clone + Send + Sync + 'static> UpdateSource<T> for HttpUpdateSource<T> {
    async fn updates(&self, since_seq: u64) -> Result<(Vec<Event<T>>, u64, chrono::DateTime<chrono::Utc>), RegistryError> {
        let url = format!("{}/updates?since={since_seq}", self.endpoint.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await.map_err(|err| RegistryError::Transport(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(RegistryError::Transport(format!("'{}' responded {}", self.endpoint, resp.status())));
        }
        let body: UpdatesResponse<T> = resp.json().await.map_err(|err| RegistryError::Transport(format!("malformed updates response: {err}")))?;
        Ok((body.events, body.since, body.lease_valid_until))
    }
}
