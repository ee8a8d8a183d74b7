//! Failure modes of legality checking and job execution.

use identifier::Identifier;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The legality pre-flight check failed before any step ran. Carries the
    /// step and the reason so an operator can see exactly which binding was
    /// unauthorized; no side effect has occurred when this is returned.
    #[error("job is illegal at step '{step}': {reason}")]
    IllegalJob { step: String, reason: String },

    /// An input or compute asset hasn't been produced yet. Benign: the step
    /// attempt is skipped this scan, not the whole job.
    #[error("'{0}' is not yet available")]
    NotYetAvailable(Identifier),

    /// A fetch was denied outright, as opposed to merely not-yet-existing.
    /// Fatal: aborts the job.
    #[error("'{requester}' may not access '{id}' at '{site}'")]
    AccessDenied { site: Identifier, id: Identifier, requester: Identifier },

    #[error("no kernel registered under the name '{0}'")]
    UnknownKernel(String),

    #[error("expected a data asset at '{0}', found a compute asset")]
    ExpectedDataAsset(Identifier),

    #[error("expected a compute asset at '{0}', found a data asset")]
    ExpectedComputeAsset(Identifier),

    /// The plan assigns no site to one of the workflow's steps, or assigns a
    /// site to a step the workflow doesn't have.
    #[error("plan does not cover the workflow's steps")]
    InvalidPlan,

    #[error("kernel '{kernel}' failed: {reason}")]
    KernelFailed { kernel: String, reason: String },

    #[error("policy error: {0}")]
    Policy(#[from] policy::PolicyError),

    #[error("identifier error: {0}")]
    Identifier(#[from] identifier::IdentifierError),

    #[error("asset store error: {0}")]
    Store(#[from] asset_store::StoreError),

    #[error("job cancelled")]
    Cancelled,

    #[error("no such job")]
    UnknownJob,

    /// Catch-all for a cross-site transport failure.
    #[error("{0}")]
    Other(String),
}
