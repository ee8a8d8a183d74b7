//! Resolves an inbound HTTP request's headers to the [`identifier::Identifier`]
//! of the party making it. What a site does
//! with that identity — which `may_access` checks it feeds into — is the
//! caller's business; this crate only answers "who is asking".

use identifier::Identifier;
use serde::Serialize;

/// The party a request has been authenticated as.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub party: Identifier,
}

#[derive(Debug)]
pub struct AuthResolverError {
    err: String,
}

impl AuthResolverError {
    pub fn new(err: String) -> Self { Self { err } }
}

impl std::fmt::Display for AuthResolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.err) }
}

impl std::error::Error for AuthResolverError {}

impl warp::reject::Reject for AuthResolverError {}

#[async_trait::async_trait]
pub trait AuthResolver {
    async fn authenticate(&self, headers: warp::http::HeaderMap) -> Result<AuthContext, AuthResolverError>;
}
