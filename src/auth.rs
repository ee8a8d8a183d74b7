//! Concrete [`AuthResolver`]s: a JWT-based one that resolves a claim to a
//! party [`Identifier`] (the claim names a party identifier rather than a
//! bare initiator string), and a mock for local runs.

use std::collections::HashMap;
use std::fs;

use auth_resolver::{AuthContext, AuthResolver, AuthResolverError};
use base64ct::Encoding as _;
use identifier::Identifier;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{DecodingKey, Header, Validation};
use log::{debug, info};
use serde::Deserialize;
use warp::http::HeaderMap;
use warp::http::HeaderValue;

#[async_trait::async_trait]
pub trait KeyResolver {
    async fn resolve_key(&self, header: &Header) -> Result<DecodingKey, AuthResolverError>;
}

pub struct KidResolver {
    jwk_store: JwkSet,
}

impl KidResolver {
    pub fn new(key_set_loc: &str) -> Result<Self, AuthResolverError> {
        let raw = fs::read_to_string(key_set_loc).map_err(|err| AuthResolverError::new(format!("could not load jwk set from '{key_set_loc}': {err}")))?;
        let jwk_store: JwkSet = serde_json::from_str(&raw).map_err(|err| AuthResolverError::new(format!("could not parse jwk set: {err}")))?;
        Ok(Self { jwk_store })
    }
}

#[async_trait::async_trait]
impl KeyResolver for KidResolver {
    async fn resolve_key(&self, header: &Header) -> Result<DecodingKey, AuthResolverError> {
        let kid = header.kid.as_ref().ok_or_else(|| AuthResolverError::new("no kid present in header".to_string()))?;
        let key: &Jwk = self.jwk_store.find(kid).ok_or_else(|| AuthResolverError::new(format!("could not find key for kid '{kid}'")))?;

        let secret: Vec<u8> = if let AlgorithmParameters::OctetKey(oct) = &key.algorithm {
            base64ct::Base64Url::decode_vec(&oct.value).map_err(|err| AuthResolverError::new(format!("could not decode secret key as URL-safe base64: {err}")))?
        } else {
            return Err(AuthResolverError::new("unsupported key type".to_string()));
        };

        Ok(DecodingKey::from_secret(&secret))
    }
}

#[derive(Deserialize)]
pub struct JwtConfig {
    /// Name of the JWT claim carrying the requester's party identifier.
    pub party_claim: String,
}

pub struct JwtResolver<KR: KeyResolver> {
    config: JwtConfig,
    key_resolver: KR,
}

impl<KR: KeyResolver + Sync> JwtResolver<KR> {
    pub fn new(config: JwtConfig, key_resolver: KR) -> Self { Self { config, key_resolver } }

    fn extract_jwt(&self, auth_header: Option<&HeaderValue>) -> Result<String, AuthResolverError> {
        let header_val = match auth_header {
            Some(v) => v.to_str().map_err(|_| AuthResolverError::new("invalid authorization header".to_string()))?,
            None => return Err(AuthResolverError::new("authorization header not present".to_string())),
        };
        let mut parts = header_val.splitn(2, ' ');
        match (parts.next(), parts.next()) {
            (Some("Bearer"), Some(token)) => Ok(token.to_string()),
            _ => Err(AuthResolverError::new("invalid authorization header".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl<KR: KeyResolver + Sync + Send> AuthResolver for JwtResolver<KR> {
    async fn authenticate(&self, headers: HeaderMap) -> Result<AuthContext, AuthResolverError> {
        info!("jwt resolver: handling incoming request");

        let raw_jwt = self.extract_jwt(headers.get("Authorization"))?;
        let header = jsonwebtoken::decode_header(&raw_jwt).map_err(|err| AuthResolverError::new(format!("could not parse JWT header: {err}")))?;
        debug!("jwt resolver: header {header:?}");

        let decoding_key = self.key_resolver.resolve_key(&header).await?;
        let validation = Validation::new(header.alg);
        let result = jsonwebtoken::decode::<HashMap<String, serde_json::Value>>(&raw_jwt, &decoding_key, &validation)
            .map_err(|err| AuthResolverError::new(format!("could not validate JWT: {err}")))?;

        let claim = result
            .claims
            .get(&self.config.party_claim)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AuthResolverError::new(format!("missing or non-string '{}' claim", self.config.party_claim)))?;

        let party = Identifier::parse(claim).map_err(|err| AuthResolverError::new(format!("'{}' claim is not a valid party identifier: {err}", self.config.party_claim)))?;
        Ok(AuthContext { party })
    }
}

/// Always resolves to the same fixed party; for local development and tests.
pub struct MockAuthResolver {
    ctx: AuthContext,
}

impl MockAuthResolver {
    pub fn new(party: Identifier) -> Self { Self { ctx: AuthContext { party } } }
}

#[async_trait::async_trait]
impl AuthResolver for MockAuthResolver {
    async fn authenticate(&self, _: HeaderMap) -> Result<AuthContext, AuthResolverError> { Ok(self.ctx.clone()) }
}
