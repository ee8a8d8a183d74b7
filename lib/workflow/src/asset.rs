//! Assets: the data and compute objects that flow through a [`crate::job::Job`].
//!
//! The concrete compute kernels a [`ComputeAsset`] names are out of scope for
//! this crate; a `ComputeAsset` only carries the `kernel` name a
//! runner looks up in its own kernel registry, plus the provenance metadata
//! every asset carries.

use identifier::Identifier;
use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Provenance of an asset: which sub-job produced it, and which of that
/// sub-job's items it is.
///
/// `job` is `None` for a primary asset (one that was never derived by a
/// workflow run, e.g. the initial inputs a party registers).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub job: Option<Job>,
    pub item: Option<String>,
}

impl Metadata {
    pub fn primary() -> Self { Self { job: None, item: None } }

    pub fn derived(job: Job, item: impl Into<String>) -> Self { Self { job: Some(job), item: Some(item.into()) } }

    pub fn is_primary(&self) -> bool { self.job.is_none() }
}

/// A stored data item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataAsset {
    pub id: Identifier,
    pub data: serde_json::Value,
    pub metadata: Metadata,
}

/// A stored compute item: names a kernel by a (deployment-defined) key; the
/// kernel itself is resolved and invoked by a runner, not by this crate.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ComputeAsset {
    pub id: Identifier,
    pub kernel: String,
    pub metadata: Metadata,
}

/// Either kind of asset a store can hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    Data(DataAsset),
    Compute(ComputeAsset),
}

impl Asset {
    pub fn id(&self) -> &Identifier {
        match self {
            Self::Data(a) => &a.id,
            Self::Compute(a) => &a.id,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Data(a) => &a.metadata,
            Self::Compute(a) => &a.metadata,
        }
    }

    pub fn as_data(&self) -> Option<&DataAsset> {
        match self {
            Self::Data(a) => Some(a),
            Self::Compute(_) => None,
        }
    }

    pub fn as_compute(&self) -> Option<&ComputeAsset> {
        match self {
            Self::Compute(a) => Some(a),
            Self::Data(_) => None,
        }
    }

    /// Checks the invariant that a `result:<h>` [`DataAsset`]'s hash matches
    /// its metadata.
    ///
    /// Returns `true` trivially for primary assets and for `ComputeAsset`s,
    /// which carry no such invariant.
    pub fn id_hash_matches_metadata(&self) -> bool {
        let Asset::Data(data) = self else { return true };
        let Some(job) = &data.metadata.job else { return true };
        let Some(item) = &data.metadata.item else { return true };
        let Some((step, output)) = item.split_once('.') else { return false };
        match Identifier::from_id_hash(job.id_hash(step, output)) {
            Ok(expected) => &expected == &data.id,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::spec::{Source, Workflow, WorkflowStep};

    fn job() -> Job {
        let step = WorkflowStep {
            name: "A".into(),
            compute_asset_id: Identifier::parse("asset:ns1:identity:ns1:s1").unwrap(),
            inputs: BTreeMap::from([("in".to_string(), Source::Input("x".into()))]),
            outputs: BTreeSet::from(["y".to_string()]),
        };
        let workflow = Workflow {
            steps: BTreeMap::from([("A".to_string(), step)]),
            inputs: BTreeMap::from([("x".to_string(), Identifier::parse("asset:ns1:x:ns1:s1").unwrap())]),
            outputs: vec![],
        };
        Job { workflow, inputs: BTreeMap::from([("x".to_string(), Identifier::parse("asset:ns1:x:ns1:s1").unwrap())]) }
    }

    #[test]
    fn derived_asset_hash_must_match_metadata() {
        let j = job();
        let sub = j.sub_job("A");
        let hash = sub.id_hash("A", "y");
        let good = Asset::Data(DataAsset {
            id: Identifier::from_id_hash(&hash).unwrap(),
            data: serde_json::json!([1, 2, 3]),
            metadata: Metadata::derived(sub.clone(), "A.y"),
        });
        assert!(good.id_hash_matches_metadata());

        let bad = Asset::Data(DataAsset {
            id: Identifier::from_id_hash("0000").unwrap(),
            data: serde_json::json!([1, 2, 3]),
            metadata: Metadata::derived(sub, "A.y"),
        });
        assert!(!bad.id_hash_matches_metadata());
    }

    #[test]
    fn primary_asset_trivially_matches() {
        let a = Asset::Data(DataAsset { id: Identifier::parse("asset:ns1:x:ns1:s1").unwrap(), data: serde_json::json!([1]), metadata: Metadata::primary() });
        assert!(a.id_hash_matches_metadata());
    }
}
