//! A structured, queryable audit trail of security-relevant site events —
//! job submissions, legality verdicts, step transitions, asset access, and
//! registry changes — as distinct from the scrolling operational log every
//! crate already writes through `log`.

use async_trait::async_trait;
use auth_resolver::AuthContext;
use identifier::Identifier;
use registry::{Party, Site};
use serde::Serialize;
use step_runner::JobStatus;
use workflow::{Job, Plan};

#[derive(Debug)]
pub enum Error {
    CouldNotDeliver(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CouldNotDeliver(msg) => write!(f, "could not deliver audit event: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl warp::reject::Reject for Error {}

/// The outcome of a job's legality pre-flight check, logged
/// once per submission before any step runs.
#[derive(Debug, Clone, Serialize)]
pub enum LegalityVerdict {
    Legal,
    Illegal { step: String, reason: String },
}

/// Security-relevant events a site (or the registry) emits over its lifetime.
///
/// Implementations decide where these land — a file, a database, a remote
/// collector — this crate only fixes the shape of what gets recorded.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// A job was submitted for execution, bound to a plan.
    async fn log_job_submission(&self, reference: &str, auth: &AuthContext, job: &Job, plan: &Plan) -> Result<(), Error>;

    /// The legality pre-flight check's verdict for a submitted job.
    async fn log_legality_verdict(&self, reference: &str, verdict: &LegalityVerdict) -> Result<(), Error>;

    /// One step (or the whole job) transitioned state.
    async fn log_step_transition(&self, reference: &str, step: &str, status: &JobStatus) -> Result<(), Error>;

    /// A party asked to retrieve an asset.
    async fn log_asset_access_request(&self, reference: &str, auth: &AuthContext, asset: &Identifier) -> Result<(), Error>;

    /// Whether that request was granted.
    async fn log_asset_access_response(&self, reference: &str, asset: &Identifier, granted: bool) -> Result<(), Error>;

    /// A party was registered with, or deregistered from, the registry.
    async fn log_party_registration(&self, auth: &AuthContext, party: &Party, registered: bool) -> Result<(), Error>;

    /// A site was registered with, or deregistered from, the registry.
    async fn log_site_registration(&self, auth: &AuthContext, site: &Site, registered: bool) -> Result<(), Error>;
}
