//! A [`Plan`] assigns each workflow step to the site that will execute it.

use std::collections::BTreeMap;

use identifier::Identifier;
use serde::{Deserialize, Serialize};

use crate::spec::Workflow;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub step_sites: BTreeMap<String, Identifier>,
}

impl Plan {
    /// Checks that the plan assigns every step in `workflow` to some site,
    /// and assigns no site to a step that doesn't exist.
    pub fn covers(&self, workflow: &Workflow) -> bool {
        workflow.steps.keys().all(|name| self.step_sites.contains_key(name)) && self.step_sites.keys().all(|name| workflow.steps.contains_key(name))
    }

    pub fn site_for(&self, step: &str) -> Option<&Identifier> { self.step_sites.get(step) }
}
