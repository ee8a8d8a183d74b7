//! The site-local HTTP facade: asset retrieval, job submission,
//! and — for a site that is a namespace's policy authority — the replication
//! feed other sites poll.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use asset_store::{AssetStore, StoreError};
use audit_logger::{AuditLogger, LegalityVerdict};
use auth_resolver::{AuthContext, AuthResolver};
use identifier::Identifier;
use log::{debug, info};
use policy::{NamespaceResolver, Rule};
use registry::{ReplicationServer, UpdatesResponse};
use serde::Serialize;
use step_runner::{JobStatus, StepRunnerService};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::models::SubmitJobRequest;
use crate::problem::Problem;

/// One site: its asset store, its step runner, and — only if it is the
/// policy authority for some namespace — the replication feed that exposes.
pub struct SiteSrv {
    addr: SocketAddr,
    site_id: Identifier,
    audit: Arc<dyn AuditLogger>,
    auth: Arc<dyn AuthResolver>,
    store: Arc<dyn AssetStore>,
    runner: Arc<StepRunnerService>,
    resolver: Arc<dyn NamespaceResolver>,
    policy_server: Option<Arc<ReplicationServer<Rule>>>,
}

#[derive(Serialize)]
struct JobHandle {
    job_id: Uuid,
}

#[derive(Serialize)]
struct JobStatusResponse {
    job_id: Uuid,
    status: JobStatus,
}

impl SiteSrv {
    pub fn new(
        addr: impl Into<SocketAddr>,
        site_id: Identifier,
        audit: Arc<dyn AuditLogger>,
        auth: Arc<dyn AuthResolver>,
        store: Arc<dyn AssetStore>,
        runner: Arc<StepRunnerService>,
        resolver: Arc<dyn NamespaceResolver>,
    ) -> Self {
        Self { addr: addr.into(), site_id, audit, auth, store, runner, resolver, policy_server: None }
    }

    /// Registers this site as the authoritative policy source for its
    /// namespace, exposing `GET /updates?since={seq}` over `server`.
    pub fn with_policy_server(mut self, server: Arc<ReplicationServer<Rule>>) -> Self {
        self.policy_server = Some(server);
        self
    }

    fn with_self(this: Arc<Self>) -> impl Filter<Extract = (Arc<Self>,), Error = Infallible> + Clone { warp::any().map(move || this.clone()) }

    fn with_auth(this: Arc<Self>) -> impl Filter<Extract = (AuthContext,), Error = Rejection> + Clone {
        Self::with_self(this).and(warp::header::headers_cloned()).and_then(|this: Arc<Self>, headers| async move {
            this.auth.authenticate(headers).await.map_err(warp::reject::custom)
        })
    }

    async fn handle_get_asset(id: Identifier, auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        let reference = Uuid::new_v4().to_string();
        this.audit.log_asset_access_request(&reference, &auth, &id).await.map_err(warp::reject::custom)?;

        match this.store.retrieve(&id, &auth.party).await {
            Ok(asset) => {
                this.audit.log_asset_access_response(&reference, &id, true).await.map_err(warp::reject::custom)?;
                Ok(Box::new(warp::reply::json(&asset)))
            },
            Err(StoreError::NotFound(_)) => {
                this.audit.log_asset_access_response(&reference, &id, false).await.map_err(warp::reject::custom)?;
                Err(warp::reject::custom(Problem::new(StatusCode::NOT_FOUND, format!("no asset '{id}' is stored here"))))
            },
            Err(StoreError::AccessDenied { .. }) => {
                this.audit.log_asset_access_response(&reference, &id, false).await.map_err(warp::reject::custom)?;
                Err(warp::reject::custom(Problem::new(StatusCode::FORBIDDEN, format!("'{}' may not access '{id}'", auth.party))))
            },
            Err(other) => Err(warp::reject::custom(Problem::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()))),
        }
    }

    async fn handle_submit_job(auth: AuthContext, this: Arc<Self>, body: SubmitJobRequest) -> Result<Box<dyn Reply>, Rejection> {
        let reference = Uuid::new_v4().to_string();
        this.audit.log_job_submission(&reference, &auth, &body.job, &body.plan).await.map_err(warp::reject::custom)?;

        let verdict = step_runner::check_legality(&body.job, &body.plan, &this.site_id, this.resolver.as_ref()).await;
        let audit_verdict = match &verdict {
            Ok(()) => LegalityVerdict::Legal,
            Err(step_runner::RunnerError::IllegalJob { step, reason }) => LegalityVerdict::Illegal { step: step.clone(), reason: reason.clone() },
            Err(err) => LegalityVerdict::Illegal { step: String::new(), reason: err.to_string() },
        };
        this.audit.log_legality_verdict(&reference, &audit_verdict).await.map_err(warp::reject::custom)?;

        if let Err(err) = verdict {
            return Err(warp::reject::custom(Problem::new(StatusCode::BAD_REQUEST, err.to_string())));
        }

        let job_id = this.runner.submit(body.job, body.plan).await.map_err(|err| warp::reject::custom(Problem::new(StatusCode::BAD_REQUEST, err.to_string())))?;

        let watcher = this.clone();
        let watch_reference = reference.clone();
        tokio::spawn(async move { watch_job(watcher, job_id, watch_reference).await });

        info!("site '{}': accepted job {job_id}", this.site_id);
        Ok(Box::new(warp::reply::with_status(warp::reply::json(&JobHandle { job_id }), StatusCode::ACCEPTED)))
    }

    async fn handle_job_status(job_id: Uuid, _auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        match this.runner.status(job_id).await {
            Ok(status) => Ok(Box::new(warp::reply::json(&JobStatusResponse { job_id, status }))),
            Err(_) => Err(warp::reject::custom(Problem::new(StatusCode::NOT_FOUND, format!("no such job '{job_id}'")))),
        }
    }

    async fn handle_cancel_job(job_id: Uuid, _auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        match this.runner.cancel(job_id).await {
            Ok(()) => Ok(Box::new(warp::reply::with_status(warp::reply::reply(), StatusCode::NO_CONTENT))),
            Err(_) => Err(warp::reject::custom(Problem::new(StatusCode::NOT_FOUND, format!("no such job '{job_id}'")))),
        }
    }

    async fn handle_updates(since: u64, _auth: AuthContext, this: Arc<Self>) -> Result<Box<dyn Reply>, Rejection> {
        let Some(server) = &this.policy_server else {
            return Err(warp::reject::custom(Problem::new(StatusCode::NOT_FOUND, "this site hosts no namespace's policy".to_string())));
        };
        let resp: UpdatesResponse<Rule> = server.updates(since).await.into();
        Ok(Box::new(warp::reply::json(&resp)))
    }

    fn routes(this: Arc<Self>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let get_asset = warp::get()
            .and(warp::path("assets"))
            .and(warp::path::param::<Identifier>())
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(Self::handle_get_asset);

        let submit_job = warp::post()
            .and(warp::path("jobs"))
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and(warp::body::json())
            .and_then(Self::handle_submit_job);

        let job_status = warp::get()
            .and(warp::path("jobs"))
            .and(warp::path::param::<Uuid>())
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(Self::handle_job_status);

        let cancel_job = warp::delete()
            .and(warp::path("jobs"))
            .and(warp::path::param::<Uuid>())
            .and(warp::path::end())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(Self::handle_cancel_job);

        let updates = warp::get()
            .and(warp::path("updates"))
            .and(warp::path::end())
            .and(warp::query::<SinceQuery>())
            .and(Self::with_auth(this.clone()))
            .and(Self::with_self(this.clone()))
            .and_then(|q: SinceQuery, auth, this| Self::handle_updates(q.since, auth, this));

        get_asset.or(submit_job).or(job_status).or(cancel_job).or(updates)
    }

    /// The site's route tree, ready to be composed under a shared recover
    /// filter by [`crate::run_site`].
    pub fn into_routes(self: Arc<Self>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone { Self::routes(self) }

    pub fn addr(&self) -> SocketAddr { self.addr }
}

#[derive(serde::Deserialize)]
struct SinceQuery {
    #[serde(default)]
    since: u64,
}

/// Polls a just-submitted job's status until it leaves `Executing`,
/// audit-logging every observed transition.
async fn watch_job(this: Arc<SiteSrv>, job_id: Uuid, reference: String) {
    let mut last = JobStatus::Pending;
    loop {
        let Ok(status) = this.runner.status(job_id).await else { return };
        if status != last {
            if let Err(err) = this.audit.log_step_transition(&reference, &job_id.to_string(), &status).await {
                debug!("site '{}': failed to log job {job_id} transition: {err}", this.site_id);
            }
            last = status.clone();
        }
        if matches!(status, JobStatus::Done | JobStatus::Failed(_) | JobStatus::Cancelled) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
