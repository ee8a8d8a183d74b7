//! Wraps [`problem_details::ProblemDetails`] so a handler can reject with a
//! status and a human-readable detail, recovered into `application/problem+json`
//! by the top-level filter in [`crate::lib`].

use warp::http::StatusCode;

pub struct Problem(pub problem_details::ProblemDetails<()>);

impl Problem {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self(problem_details::ProblemDetails::new().with_status(status).with_detail(detail.into()))
    }
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Problem({:?})", self.0.status) }
}

impl warp::reject::Reject for Problem {}
