//! A [`Job`] binds a [`Workflow`] to concrete primary inputs, and knows how
//! to carve itself into the minimal sub-job needed to reproduce any one of
//! its items.

use std::collections::{BTreeMap, BTreeSet};

use identifier::Identifier;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::spec::{Source, Workflow, WorkflowStep};

/// A workflow bound to concrete primary inputs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub workflow: Workflow,
    /// Concretises each of `workflow.inputs`'s keys with an asset identifier.
    pub inputs: BTreeMap<String, Identifier>,
}

impl Job {
    /// The minimal sub-workflow containing `step` and all its transitive
    /// dependencies, with only the workflow inputs those dependencies
    /// actually consume.
    ///
    /// This is what gets hashed (together with an output selector) to
    /// produce the `result:` identifier of any item the step produces —
    /// see [`Job::id_hash`].
    pub fn sub_job(&self, step_name: &str) -> Job {
        let mut included_steps: BTreeSet<String> = BTreeSet::new();
        let mut frontier = vec![step_name.to_string()];
        let mut used_inputs: BTreeSet<String> = BTreeSet::new();

        while let Some(name) = frontier.pop() {
            if !included_steps.insert(name.clone()) {
                continue;
            }
            let Some(step) = self.workflow.step(&name) else { continue };
            for src in self.workflow.direct_dependencies(step) {
                match src {
                    Source::Step { step: upstream, .. } => frontier.push(upstream.clone()),
                    Source::Input(key) => {
                        used_inputs.insert(key.clone());
                    },
                }
            }
        }

        let steps: BTreeMap<String, WorkflowStep> =
            self.workflow.steps.iter().filter(|(name, _)| included_steps.contains(*name)).map(|(k, v)| (k.clone(), v.clone())).collect();
        let inputs: BTreeMap<String, Identifier> =
            self.workflow.inputs.iter().filter(|(key, _)| used_inputs.contains(*key)).map(|(k, v)| (k.clone(), v.clone())).collect();
        let job_inputs: BTreeMap<String, Identifier> =
            self.inputs.iter().filter(|(key, _)| used_inputs.contains(*key)).map(|(k, v)| (k.clone(), v.clone())).collect();

        Job { workflow: Workflow { steps, inputs, outputs: Vec::new() }, inputs: job_inputs }
    }

    /// Stable hash of `sub_job(step)` together with `output`, forming the
    /// `result:` identifier of item `"<step>.<output>"`.
    ///
    /// Uses SHA-256 over the canonical-JSON serialization of the sub-job and
    /// output selector; `Workflow`'s map-typed fields are `BTreeMap`s so
    /// serialization order never depends on insertion/declaration order,
    /// which is what makes the hash stable under step reordering.
    pub fn id_hash(&self, step: &str, output: &str) -> String {
        let sub = self.sub_job(step);
        let mut hasher = Sha256::new();
        // Length-prefix both halves so no ambiguity can arise between e.g.
        // a sub-job JSON ending in digits and an output selector starting
        // with them.
        let sub_json = serde_json::to_vec(&sub).expect("Job is always JSON-serializable");
        hasher.update((sub_json.len() as u64).to_le_bytes());
        hasher.update(&sub_json);
        hasher.update((output.len() as u64).to_le_bytes());
        hasher.update(output.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The id-hash of every `"<step>.<output>"` item in this job's workflow.
    pub fn id_hashes(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for step in self.workflow.steps.values() {
            for output in &step.outputs {
                let item = format!("{}.{}", step.name, output);
                out.insert(item, self.id_hash(&step.name, output));
            }
        }
        out
    }

    /// Resolves a [`Source`] to the concrete `(site-to-ask, asset-to-ask-for)`
    /// pair, given a plan's `step -> site` assignment.
    ///
    /// For a `Source::Step`, the asset is the `result:` identifier computed
    /// from this job's id-hashes and the site is whatever the plan assigned
    /// that upstream step to. For a `Source::Input`, the asset is whatever
    /// this job bound that input key to, and the site is that asset's own
    /// location.
    pub fn resolve_source(
        &self,
        source: &Source,
        step_sites: &BTreeMap<String, Identifier>,
        id_hashes: &BTreeMap<String, String>,
    ) -> Result<(Identifier, Identifier), identifier::IdentifierError> {
        match source {
            Source::Step { step, output } => {
                let item = format!("{step}.{output}");
                let site = step_sites.get(step).cloned().unwrap_or_else(|| Identifier::wildcard());
                let asset = Identifier::from_id_hash(id_hashes.get(&item).cloned().unwrap_or_default())?;
                Ok((site, asset))
            },
            Source::Input(key) => {
                let asset = self.inputs.get(key).cloned().unwrap_or_else(Identifier::wildcard);
                let site = asset.location()?;
                Ok((site, asset))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use identifier::Identifier;

    use super::*;
    use crate::spec::{Source, WorkflowStep};

    fn single_step_job() -> Job {
        let step = WorkflowStep {
            name: "A".into(),
            compute_asset_id: Identifier::parse("asset:ns1:identity:ns1:s1").unwrap(),
            inputs: BTreeMap::from([("in".to_string(), Source::Input("x".into()))]),
            outputs: BTreeSet::from(["y".to_string()]),
        };
        let workflow = Workflow {
            steps: BTreeMap::from([("A".to_string(), step)]),
            inputs: BTreeMap::from([("x".to_string(), Identifier::parse("asset:ns1:x:ns1:s1").unwrap())]),
            outputs: vec![Source::Step { step: "A".into(), output: "y".into() }],
        };
        Job { workflow, inputs: BTreeMap::from([("x".to_string(), Identifier::parse("asset:ns1:x:ns1:s1").unwrap())]) }
    }

    #[test]
    fn id_hash_is_stable_across_unrelated_step_order() {
        let job_a = single_step_job();

        // Build an equivalent job where an independent, unrelated step B is
        // present too -- it must not affect A.y's hash.
        let mut job_b = single_step_job();
        job_b.workflow.steps.insert(
            "B".to_string(),
            WorkflowStep {
                name: "B".into(),
                compute_asset_id: Identifier::parse("asset:ns1:noop:ns1:s1").unwrap(),
                inputs: BTreeMap::new(),
                outputs: BTreeSet::new(),
            },
        );

        assert_eq!(job_a.id_hash("A", "y"), job_b.id_hash("A", "y"));
    }

    #[test]
    fn sub_job_only_includes_transitive_dependencies() {
        let mut job = single_step_job();
        job.workflow.steps.insert(
            "B".to_string(),
            WorkflowStep {
                name: "B".into(),
                compute_asset_id: Identifier::parse("asset:ns1:noop:ns1:s1").unwrap(),
                inputs: BTreeMap::new(),
                outputs: BTreeSet::new(),
            },
        );
        let sub = job.sub_job("A");
        assert_eq!(sub.workflow.steps.len(), 1);
        assert!(sub.workflow.steps.contains_key("A"));
    }

    #[test]
    fn id_hashes_cover_every_output() {
        let job = single_step_job();
        let hashes = job.id_hashes();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains_key("A.y"));
    }
}
