//! Turns a workflow's namespace-scoped rules into a permission set per item,
//! and answers the one question a runner ever needs to ask of one: can this
//! party or site access it?

pub mod evaluator;
pub mod replica_source;
pub mod rule;
pub mod source;

pub use evaluator::{evaluate, evaluate_primary, evaluate_pure, may_access, EvaluatedPolicy, PermissionSet};
pub use replica_source::ReplicaPolicySource;
pub use rule::{IdPattern, Rule};
pub use source::{NamespaceResolver, PolicyError, PolicySource};
