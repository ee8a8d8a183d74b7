//! Request bodies that don't already coincide with a domain type.

use serde::Deserialize;
use workflow::{Job, Plan};

/// Body of `POST /jobs`: a job bound to the plan that assigns
/// each of its steps a site.
#[derive(Deserialize)]
pub struct SubmitJobRequest {
    pub job: Job,
    pub plan: Plan,
}
