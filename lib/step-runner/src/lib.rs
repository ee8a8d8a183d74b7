//! Executes a site's local slice of a submitted job: a legality pre-flight
//! check, then a polling loop that retrieves inputs (possibly from other
//! sites), runs the bound compute kernel, and stores each output.

pub mod error;
pub mod fetch;
pub mod job_run;
pub mod kernel;
pub mod service;

pub use error::RunnerError;
pub use fetch::AssetFetcher;
pub use job_run::{check_legality, BackOff, CancelToken, JobRun};
pub use kernel::{Kernel, KernelRegistry};
pub use service::{JobStatus, StepRunnerService};
