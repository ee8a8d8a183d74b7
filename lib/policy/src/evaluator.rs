//! Resolves a [`Job`] into a permission set per item, by combining every
//! referenced namespace's rules.
//!
//! The evaluator is a pure function of a job and the rule sets of the
//! namespaces it references: [`evaluate_pure`]
//! takes those rule sets as plain data and does no I/O, which is what makes
//! it directly unit-testable. [`PolicyEvaluator::evaluate`] is the thin,
//! async wrapper that gathers those rule sets through a [`NamespaceResolver`]
//! first.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use identifier::Identifier;
use log::{debug, trace};

use crate::rule::{IdPattern, Rule};
use crate::source::{NamespaceResolver, PolicyError};

/// The collections an item belongs to. Opaque to everyone but this crate:
/// the only thing a caller may do with one is ask [`EvaluatedPolicy::may_access`].
pub type PermissionSet = BTreeSet<Identifier>;

/// The result of evaluating one job's policy: a permission set per item,
/// plus the rule sets that produced it (needed again by
/// [`EvaluatedPolicy::may_access`], since access rules are looked up per
/// target collection's own namespace, not per source item).
#[derive(Debug, Default)]
pub struct EvaluatedPolicy {
    permissions: BTreeMap<String, PermissionSet>,
    rules_by_namespace: BTreeMap<String, Vec<Rule>>,
}

impl EvaluatedPolicy {
    /// The permission set of item `item` (a workflow input key, `"<step>"`
    /// for a compute binding, `"<step>.<input>"` for a step's view of an
    /// input, or `"<step>.<output>"` for a step's output).
    pub fn get(&self, item: &str) -> Result<&PermissionSet, PolicyError> {
        self.permissions.get(item).ok_or_else(|| PolicyError::UndefinedItem(item.to_string()))
    }

    /// Whether `who` may access anything carrying permission set `perm`.
    ///
    /// Only rules from a collection's *own* namespace's source are ever
    /// consulted for that collection — trust scoping is enforced simply by
    /// never looking anywhere else.
    pub fn may_access(&self, perm: &PermissionSet, who: &Identifier) -> bool { may_access(perm, who, &self.rules_by_namespace) }

    /// Builds an [`EvaluatedPolicy`] directly from already-computed
    /// permissions and rule sets — used to gate a primary asset, which has
    /// no producing job and so never goes through [`evaluate_pure`].
    pub fn from_parts(permissions: BTreeMap<String, PermissionSet>, rules_by_namespace: BTreeMap<String, Vec<Rule>>) -> Self {
        Self { permissions, rules_by_namespace }
    }
}

/// Whether `who` may access anything carrying permission set `perm`, given
/// `rules_by_namespace`.
///
/// Only rules from a collection's *own* namespace's source are ever
/// consulted for that collection — trust scoping is enforced simply by never
/// looking anywhere else.
pub fn may_access(perm: &PermissionSet, who: &Identifier, rules_by_namespace: &BTreeMap<String, Vec<Rule>>) -> bool {
    for collection in perm {
        let Ok(ns) = collection.namespace() else { continue };
        let Some(rules) = rules_by_namespace.get(ns) else { continue };
        for rule in rules {
            let granted = match rule {
                Rule::MayAccess { asset_or_collection, party_or_collection } => {
                    asset_or_collection.matches(collection) && party_or_collection.covers_party(who)
                },
                Rule::MayAccessCollection { collection: c, party_or_collection } => c.matches(collection) && party_or_collection.covers_party(who),
                Rule::ResultOfDataIn { .. } | Rule::ResultOfComputeIn { .. } => false,
            };
            if granted {
                return true;
            }
        }
    }
    false
}

/// Topologically sorts `steps` by their `Source::Step` dependencies (Kahn's
/// algorithm), so propagation (step 2 of the algorithm) can process every
/// step only after everything it reads from.
fn topo_sort(workflow: &workflow::Workflow) -> Vec<String> {
    let mut indegree: BTreeMap<&str, usize> = workflow.steps.keys().map(|s| (s.as_str(), 0)).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, step) in &workflow.steps {
        for src in workflow.direct_dependencies(step) {
            if let workflow::Source::Step { step: upstream, .. } = src {
                *indegree.get_mut(name.as_str()).expect("step is in workflow.steps") += 1;
                dependents.entry(upstream.as_str()).or_default().push(name.as_str());
            }
        }
    }

    let mut queue: VecDeque<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(&n, _)| n).collect();
    let mut order = Vec::with_capacity(workflow.steps.len());
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        if let Some(deps) = dependents.get(name) {
            for &dep in deps {
                let d = indegree.get_mut(dep).expect("dependent is in workflow.steps");
                *d -= 1;
                if *d == 0 {
                    queue.push_back(dep);
                }
            }
        }
    }
    order
}

/// The item label for a step's compute binding.
fn compute_item(step: &str) -> String { step.to_string() }

/// The item label for `step`'s view of input `input`.
fn input_item(step: &str, input: &str) -> String { format!("{step}.{input}") }

/// Collections `against` is granted into by the `ResultOfDataIn` (if
/// `is_data`) or `ResultOfComputeIn` rules in `rules` whose pattern matches it.
fn matching_collections(rules: &[Rule], is_data: bool, against: &Identifier) -> BTreeSet<Identifier> {
    rules
        .iter()
        .filter_map(|rule| match (is_data, rule) {
            (true, Rule::ResultOfDataIn { data_pattern, collection }) if data_pattern.matches(against) => collection_identifier(collection),
            (false, Rule::ResultOfComputeIn { compute_pattern, collection }) if compute_pattern.matches(against) => collection_identifier(collection),
            _ => None,
        })
        .collect()
}

/// A rule's `collection` pattern, read back as the concrete [`Identifier`] it
/// names. Rules that spell their collection with a wildcard don't identify a
/// single collection and are skipped — matching is always the other
/// direction (pattern-against-asset), so a wildcarded collection argument
/// can never contribute a concrete membership.
fn collection_identifier(pattern: &IdPattern) -> Option<Identifier> { Identifier::parse(pattern.to_string()).ok() }

/// The base membership of a primary asset: its own identifier as a singleton
/// collection, plus every collection a `ResultOfDataIn` rule from its own
/// namespace grants it into.
///
/// Exposed standalone so a store can gate a primary asset (one with no
/// producing job) without having to synthesize a throwaway [`workflow::Job`]
/// just to ask one question.
pub fn base_membership(id: &Identifier, rules_by_namespace: &BTreeMap<String, Vec<Rule>>) -> PermissionSet {
    let mut perm = PermissionSet::new();
    perm.insert(id.clone());
    if let Ok(ns) = id.namespace() {
        if let Some(rules) = rules_by_namespace.get(ns) {
            perm.extend(matching_collections(rules, true, id));
        }
    }
    perm
}

/// Pure evaluation core: no I/O, deterministic given `job` and `rules_by_namespace`.
pub fn evaluate_pure(job: &workflow::Job, rules_by_namespace: &BTreeMap<String, Vec<Rule>>) -> Result<EvaluatedPolicy, PolicyError> {
    let mut permissions: BTreeMap<String, PermissionSet> = BTreeMap::new();

    // Step 1: base memberships for every primary (workflow-input) asset.
    for (key, id) in job.workflow.inputs.iter().chain(job.inputs.iter()) {
        if permissions.contains_key(key) {
            continue;
        }
        let perm = base_membership(id, rules_by_namespace);
        trace!("policy: base item '{key}' -> {} collection(s)", perm.len());
        permissions.insert(key.clone(), perm);
    }

    // Step 2: propagate across the DAG in topological order.
    for name in topo_sort(&job.workflow) {
        let step = job.workflow.step(&name).expect("topo_sort only yields known steps");

        let compute_ns = step.compute_asset_id.namespace().ok();
        let compute_collections = compute_ns
            .and_then(|ns| rules_by_namespace.get(ns))
            .map(|rules| matching_collections(rules, false, &step.compute_asset_id))
            .unwrap_or_default();
        permissions.insert(compute_item(&name), compute_collections.clone());

        let mut data_candidates: Option<BTreeSet<Identifier>> = None;
        for (input_name, source) in &step.inputs {
            let source_label = match source {
                workflow::Source::Step { step: upstream, output } => input_item(upstream, output),
                workflow::Source::Input(key) => key.clone(),
            };
            let resolved_id = match source {
                workflow::Source::Step { step: upstream, output } => Identifier::from_id_hash(job.id_hash(upstream, output))?,
                workflow::Source::Input(key) => job.inputs.get(key).cloned().unwrap_or_else(Identifier::wildcard),
            };
            let source_perm = permissions.get(&source_label).cloned().unwrap_or_default();

            // A collection survives into this input only if *its own*
            // namespace's rules have a ResultOfDataIn pattern matching the
            // resolved source identifier -- this is what lets propagation
            // continue across a `result:` identifier, which otherwise has no
            // namespace of its own to look rules up under.
            let candidate: BTreeSet<Identifier> = source_perm
                .into_iter()
                .filter(|collection| {
                    let Ok(ns) = collection.namespace() else { return false };
                    rules_by_namespace
                        .get(ns)
                        .map(|rules| rules.iter().any(|r| matches!(r, Rule::ResultOfDataIn { data_pattern, collection: c } if data_pattern.matches(&resolved_id) && collection_identifier(c).as_ref() == Some(collection))))
                        .unwrap_or(false)
                })
                .collect();

            permissions.insert(input_item(&name, input_name), permissions.get(&source_label).cloned().unwrap_or_default());
            data_candidates = Some(match data_candidates {
                None => candidate,
                Some(acc) => acc.intersection(&candidate).cloned().collect(),
            });
        }

        let output_collections = match data_candidates {
            Some(data) => data.intersection(&compute_collections).cloned().collect(),
            None => compute_collections,
        };
        debug!("policy: step '{name}' outputs -> {} collection(s)", output_collections.len());
        for output in &step.outputs {
            permissions.insert(format!("{name}.{output}"), output_collections.clone());
        }
    }

    Ok(EvaluatedPolicy { permissions, rules_by_namespace: rules_by_namespace.clone() })
}

/// Gathers every namespace referenced anywhere in `job`, then asks `resolver`
/// for each one's rules exactly once.
async fn gather_rules(job: &workflow::Job, resolver: &dyn NamespaceResolver) -> Result<BTreeMap<String, Vec<Rule>>, PolicyError> {
    let mut namespaces: BTreeSet<String> = BTreeSet::new();
    for step in job.workflow.steps.values() {
        if let Ok(ns) = step.compute_asset_id.namespace() {
            namespaces.insert(ns.to_string());
        }
    }
    for id in job.workflow.inputs.values().chain(job.inputs.values()) {
        if let Ok(ns) = id.namespace() {
            namespaces.insert(ns.to_string());
        }
    }

    let mut rules_by_namespace = BTreeMap::new();
    for ns in namespaces {
        let source = resolver.policy_source_for(&ns).await?;
        let rules = source.rules_for(&ns).await?;
        rules_by_namespace.insert(ns, rules);
    }
    Ok(rules_by_namespace)
}

/// Evaluates `job`'s policy by discovering every referenced namespace's rules
/// through `resolver`, then running [`evaluate_pure`].
pub async fn evaluate(job: &workflow::Job, resolver: &dyn NamespaceResolver) -> Result<EvaluatedPolicy, PolicyError> {
    let rules_by_namespace = gather_rules(job, resolver).await?;
    evaluate_pure(job, &rules_by_namespace)
}

/// Gates a single identifier with no producing job (a primary asset):
/// discovers its namespace's rules and computes its base membership.
pub async fn evaluate_primary(id: &Identifier, resolver: &dyn NamespaceResolver) -> Result<EvaluatedPolicy, PolicyError> {
    let mut rules_by_namespace = BTreeMap::new();
    if let Ok(ns) = id.namespace() {
        let source = resolver.policy_source_for(ns).await?;
        rules_by_namespace.insert(ns.to_string(), source.rules_for(ns).await?);
    }
    let perm = base_membership(id, &rules_by_namespace);
    let permissions = BTreeMap::from([(id.to_string(), perm)]);
    Ok(EvaluatedPolicy::from_parts(permissions, rules_by_namespace))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use workflow::{Source, Workflow, WorkflowStep};

    use super::*;

    fn rules(ns1: Vec<Rule>) -> BTreeMap<String, Vec<Rule>> { BTreeMap::from([("ns1".to_string(), ns1)]) }

    fn single_step_job() -> workflow::Job {
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
        workflow::Job { workflow, inputs: BTreeMap::from([("x".to_string(), Identifier::parse("asset:ns1:x:ns1:s1").unwrap())]) }
    }

    #[test]
    fn base_membership_includes_own_identifier_as_singleton() {
        let job = single_step_job();
        let policy = evaluate_pure(&job, &BTreeMap::new()).unwrap();
        let perm = policy.get("x").unwrap();
        assert!(perm.contains(&Identifier::parse("asset:ns1:x:ns1:s1").unwrap()));
    }

    #[test]
    fn output_inherits_collection_when_both_data_and_compute_rules_match() {
        let job = single_step_job();
        let c = Identifier::parse("asset_collection:ns1:c1").unwrap();
        let rules = rules(vec![
            Rule::ResultOfDataIn { data_pattern: IdPattern::parse("asset:ns1:x:ns1:s1"), collection: IdPattern::parse("asset_collection:ns1:c1") },
            Rule::ResultOfComputeIn {
                compute_pattern: IdPattern::parse("asset:ns1:identity:ns1:s1"),
                collection: IdPattern::parse("asset_collection:ns1:c1"),
            },
        ]);
        let policy = evaluate_pure(&job, &rules).unwrap();
        assert!(policy.get("A.y").unwrap().contains(&c));
    }

    #[test]
    fn output_excluded_when_compute_rule_is_missing() {
        let job = single_step_job();
        let rules = rules(vec![Rule::ResultOfDataIn {
            data_pattern: IdPattern::parse("asset:ns1:x:ns1:s1"),
            collection: IdPattern::parse("asset_collection:ns1:c1"),
        }]);
        let policy = evaluate_pure(&job, &rules).unwrap();
        assert!(policy.get("A.y").unwrap().is_empty());
    }

    #[test]
    fn may_access_grants_through_may_access_collection() {
        let job = single_step_job();
        let rules = rules(vec![
            Rule::ResultOfDataIn { data_pattern: IdPattern::parse("asset:ns1:x:ns1:s1"), collection: IdPattern::parse("asset_collection:ns1:c1") },
            Rule::ResultOfComputeIn {
                compute_pattern: IdPattern::parse("asset:ns1:identity:ns1:s1"),
                collection: IdPattern::parse("asset_collection:ns1:c1"),
            },
            Rule::MayAccessCollection {
                collection: IdPattern::parse("asset_collection:ns1:c1"),
                party_or_collection: IdPattern::parse("party:ns2:p2"),
            },
        ]);
        let policy = evaluate_pure(&job, &rules).unwrap();
        let perm = policy.get("A.y").unwrap();
        assert!(policy.may_access(perm, &Identifier::parse("party:ns2:p2").unwrap()));
        assert!(!policy.may_access(perm, &Identifier::parse("party:ns2:p3").unwrap()));
    }

    #[test]
    fn undefined_item_is_an_error() {
        let job = single_step_job();
        let policy = evaluate_pure(&job, &BTreeMap::new()).unwrap();
        assert!(policy.get("nonexistent").is_err());
    }
}
