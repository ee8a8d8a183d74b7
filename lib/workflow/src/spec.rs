//! Defines the workflow representation shared by the policy evaluator and
//! the step runner: a DAG of [`WorkflowStep`]s plus the handful of
//! declarations ([`Workflow::inputs`], [`Workflow::outputs`]) that tie it to
//! the outside world.

use std::collections::{BTreeMap, BTreeSet};

use identifier::Identifier;
use serde::{Deserialize, Serialize};

/// Where a step's input comes from: either another step's output, or a
/// workflow-level input key.
///
/// Parsed from the `"<upstream_step>.<output_name>"` / bare-key grammar by
/// [`Source::parse`] — mirrors the `'.' in inp_source` check the original
/// Python proof of concept used.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Source {
    /// `"<step>.<output>"`: the output of an upstream step in the same workflow.
    Step { step: String, output: String },
    /// A bare key into the workflow's (or job's) `inputs` map.
    Input(String),
}

impl Source {
    pub fn parse(s: impl AsRef<str>) -> Self {
        let s = s.as_ref();
        match s.split_once('.') {
            Some((step, output)) => Self::Step { step: step.to_string(), output: output.to_string() },
            None => Self::Input(s.to_string()),
        }
    }

    /// Renders back to the `"<step>.<output>"` / bare-key text form.
    pub fn render(&self) -> String {
        match self {
            Self::Step { step, output } => format!("{step}.{output}"),
            Self::Input(key) => key.clone(),
        }
    }
}

impl TryFrom<String> for Source {
    type Error = std::convert::Infallible;
    fn try_from(value: String) -> Result<Self, Self::Error> { Ok(Self::parse(value)) }
}
impl From<Source> for String {
    fn from(value: Source) -> Self { value.render() }
}

/// One node in a [`Workflow`]'s DAG.
///
/// Every step has a unique `name` within its workflow, a compute asset
/// binding, a mapping of named inputs to their [`Source`], and a set of
/// output names it produces.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub compute_asset_id: Identifier,
    /// Input name -> where it comes from. A `BTreeMap` so step serialization
    /// (and therefore the id-hash, see [`crate::job`]) never depends on
    /// declaration order.
    pub inputs: BTreeMap<String, Source>,
    /// Names of the outputs this step produces.
    pub outputs: BTreeSet<String>,
}

/// A DAG of [`WorkflowStep`]s, plus the declared workflow-level inputs and
/// outputs that connect it to a [`crate::job::Job`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Steps keyed by name. A `BTreeMap` so two workflows with the same
    /// steps always serialize identically regardless of how they were built
    /// or deserialized.
    pub steps: BTreeMap<String, WorkflowStep>,
    /// Workflow input key -> the asset identifier that key is bound to by
    /// default. A concrete [`crate::job::Job`] may supply its own bindings
    /// for the same keys.
    pub inputs: BTreeMap<String, Identifier>,
    /// The workflow's declared outputs, in declaration order (this one list
    /// is semantically ordered, unlike `steps`/`inputs`).
    pub outputs: Vec<Source>,
}

impl Workflow {
    /// Direct data and compute dependencies of `step`, as [`Source`]s.
    ///
    /// Used by [`crate::job::Job::sub_job`] to walk the dependency DAG
    /// backwards from a step.
    pub fn direct_dependencies(&self, step: &WorkflowStep) -> impl Iterator<Item = &Source> + '_ { step.inputs.values() }

    pub fn step(&self, name: &str) -> Option<&WorkflowStep> { self.steps.get(name) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parse_roundtrip() {
        assert_eq!(Source::parse("A.y"), Source::Step { step: "A".into(), output: "y".into() });
        assert_eq!(Source::parse("x"), Source::Input("x".into()));
        assert_eq!(Source::parse("A.y").render(), "A.y");
    }
}
