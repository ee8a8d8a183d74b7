//! Defines the workflow representation used internally by the policy
//! evaluator and the step runner: a DAG of steps, bound to concrete inputs
//! as a [`job::Job`], scheduled onto sites as a [`plan::Plan`].

pub mod asset;
pub mod job;
pub mod plan;
pub mod spec;

pub use asset::{Asset, ComputeAsset, DataAsset, Metadata};
pub use job::Job;
pub use plan::Plan;
pub use spec::{Source, Workflow, WorkflowStep};
