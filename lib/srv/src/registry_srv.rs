//! The registry's own HTTP facade: party/site registration and
//! deregistration, plus the replication feed every site's [`registry::RegistryClient`]
//! polls.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use audit_logger::AuditLogger;
use auth_resolver::{AuthContext, AuthResolver};
use identifier::Identifier;
use registry::{Party, RegisteredObject, Registry, RegistryError, Site, UpdatesResponse};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::problem::Problem;

pub struct RegistrySrv {
    addr: SocketAddr,
    audit: Arc<dyn AuditLogger>,
    auth: Arc<dyn AuthResolver>,
    registry: Arc<Registry>,
}

impl RegistrySrv {
    pub fn new(addr: impl Into<SocketAddr>, audit: Arc<dyn AuditLogger>, auth: Arc<dyn AuthResolver>, registry: Arc<Registry>) -> Self {
        Self { addr: addr.into(), audit, auth, registry }
    }

    pub fn addr(&self) -> SocketAddr { self.addr }

    fn with_self(this: Arc<Self>) -> impl Filter<Extract = (Arc<Self>,), Error = Infallible> + Clone { warp::any().map(move || this.clone()) }

    fn with_auth(this: Arc<Self>) -> impl Filter<Extract = (AuthContext,), Error = Rejection> + Clone {
        Self::with_self(this).and(warp::header::headers_cloned()).and_then(|this: Arc<Self>, headers| async move {
            this.auth.authenticate(headers).await.map_err(warp::reject::custom)
        })
    }

    async fn handle_register_party(auth: AuthContext, this: Arc<Self>, party: Party) -> Result<Box<dyn Reply>, Rejection> {
        match this.registry.register_party(party.clone()).await {
            Ok(_) => {
                this.audit.log_party_registration(&auth, &party, true).await.map_err(warp::reject::custom)?;
                Ok(Box::new(warp::reply::with_status(warp::reply::json(&party), StatusCode::CREATED)))
            },
            Err(RegistryError::DuplicateId(id)) => Err(warp::reject::custom(Problem::new(StatusCode::CONFLICT, format!("'{id}' is already registered")))),
            Err(RegistryError::DuplicateName(name)) => Err(warp::reject::custom(Problem::new(StatusCode::CONFLICT, format!("name '{name}' is already registered")))),
            Err(other) => Err(warp::reject::custom(Problem::new(StatusCode::BAD_REQUEST, other.to_string()))),
        }
    }

    async fn handle_deregister_party(id: Identifier, auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        let party = this.registry.get_party(&id).await;
        match this.registry.deregister_party(&id).await {
            Ok(_) => {
                if let Some(party) = party {
                    this.audit.log_party_registration(&auth, &party, false).await.map_err(warp::reject::custom)?;
                }
                Ok(Box::new(warp::reply::with_status(warp::reply::reply(), StatusCode::NO_CONTENT)))
            },
            Err(RegistryError::UnknownKey(_)) => Err(warp::reject::custom(Problem::new(StatusCode::NOT_FOUND, format!("no party '{id}'")))),
            Err(other) => Err(warp::reject::custom(Problem::new(StatusCode::BAD_REQUEST, other.to_string()))),
        }
    }

    async fn handle_register_site(auth: AuthContext, this: Arc<Self>, site: Site) -> Result<Box<dyn Reply>, Rejection> {
        match this.registry.register_site(site.clone()).await {
            Ok(_) => {
                this.audit.log_site_registration(&auth, &site, true).await.map_err(warp::reject::custom)?;
                Ok(Box::new(warp::reply::with_status(warp::reply::json(&site), StatusCode::CREATED)))
            },
            Err(RegistryError::DuplicateId(id)) => Err(warp::reject::custom(Problem::new(StatusCode::CONFLICT, format!("'{id}' is already registered")))),
            Err(RegistryError::DuplicateName(name)) => Err(warp::reject::custom(Problem::new(StatusCode::CONFLICT, format!("name '{name}' is already registered")))),
            Err(other) => Err(warp::reject::custom(Problem::new(StatusCode::BAD_REQUEST, other.to_string()))),
        }
    }

    async fn handle_deregister_site(id: Identifier, auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        let site = this.registry.get_site(&id).await;
        match this.registry.deregister_site(&id).await {
            Ok(_) => {
                if let Some(site) = site {
                    this.audit.log_site_registration(&auth, &site, false).await.map_err(warp::reject::custom)?;
                }
                Ok(Box::new(warp::reply::with_status(warp::reply::reply(), StatusCode::NO_CONTENT)))
            },
            Err(RegistryError::UnknownKey(_)) => Err(warp::reject::custom(Problem::new(StatusCode::NOT_FOUND, format!("no site '{id}'")))),
            Err(other) => Err(warp::reject::custom(Problem::new(StatusCode::BAD_REQUEST, other.to_string()))),
        }
    }

    async fn handle_updates(since: u64, _auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        let resp: UpdatesResponse<RegisteredObject> = this.registry.replication_server().updates(since).await.into();
        Ok(Box::new(warp::reply::json(&resp)))
    }

    fn routes(this: Arc<Self>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let register_party = warp::post()
            .and(warp::path("parties"))
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and(warp::body::json())
            .and_then(Self::handle_register_party);

        let deregister_party = warp::delete()
            .and(warp::path("parties"))
            .and(warp::path::param::<Identifier>())
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(Self::handle_deregister_party);

        let register_site = warp::post()
            .and(warp::path("sites"))
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and(warp::body::json())
            .and_then(Self::handle_register_site);

        let deregister_site = warp::delete()
            .and(warp::path("sites"))
            .and(warp::path::param::<Identifier>())
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(Self::handle_deregister_site);

        let updates = warp::get()
            .and(warp::path("updates"))
            .and(warp::path::end())
            .and(warp::query::<SinceQuery>())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(|q: SinceQuery, auth, this| Self::handle_updates(q.since, auth, this));

        register_party.or(deregister_party).or(register_site).or(deregister_site).or(updates)
    }

    pub fn into_routes(self: Arc<Self>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone { Self::routes(self) }
}

#[derive(serde::Deserialize)]
struct SinceQuery {
    #[serde(default)]
    since: u64,
}
