//! Execution of one job's local slice of a workflow: legality pre-flight,
//! then a scan-execute-or-back-off loop over this site's steps.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use identifier::Identifier;
use log::{debug, info, warn};
use policy::NamespaceResolver;
use rand::Rng;
use tokio::sync::Notify;
use workflow::{Asset, ComputeAsset, DataAsset, Job, Metadata, Plan};

use crate::error::RunnerError;
use crate::fetch::AssetFetcher;
use crate::kernel::KernelRegistry;

/// Back-off schedule for the scan loop: starts at `initial`, doubles on every
/// scan that makes no progress, capped at `max`, with up to 20% jitter added
/// so that many idle workers don't wake up in lockstep.
#[derive(Clone, Copy, Debug)]
pub struct BackOff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackOff {
    fn default() -> Self { Self { initial: Duration::from_millis(500), max: Duration::from_secs(8) } }
}

impl BackOff {
    fn next(self, attempt: u32) -> Duration {
        let doubled = self.initial.saturating_mul(1 << attempt.min(8));
        let capped = doubled.min(self.max);
        let jitter = rand::thread_rng().gen_range(0.0..0.2);
        capped.mul_f64(1.0 + jitter)
    }
}

/// A cooperative cancellation flag one [`JobRun`] listens to between steps
/// and before sleeping.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::SeqCst) }
}

/// One site's local run of a job: the step pre-flight check and the
/// execution loop, both grounded on `step_runner.py`'s `JobRun`.
pub struct JobRun {
    pub job: Job,
    pub plan: Plan,
    pub this_site: Identifier,
    pub resolver: Arc<dyn NamespaceResolver>,
    pub fetcher: Arc<dyn AssetFetcher>,
    pub store: Arc<dyn asset_store::AssetStore>,
    pub kernels: Arc<KernelRegistry>,
    pub back_off: BackOff,
    pub cancel: CancelToken,
}

impl JobRun {
    /// Runs the job to completion (every step assigned to `this_site` done),
    /// or returns the first fatal error encountered.
    ///
    /// The legality check runs once, in full, before anything else executes;
    /// a failure here has caused zero side effects.
    pub async fn run(&self) -> Result<(), RunnerError> {
        if !self.plan.covers(&self.job.workflow) {
            return Err(RunnerError::InvalidPlan);
        }

        check_legality(&self.job, &self.plan, &self.this_site, self.resolver.as_ref()).await?;

        let id_hashes = self.job.id_hashes();
        let mut todo: BTreeSet<String> =
            self.job.workflow.steps.keys().filter(|name| self.plan.site_for(name) == Some(&self.this_site)).cloned().collect();

        let mut idle_scans = 0u32;
        while !todo.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            let mut progressed = false;
            for step_name in todo.clone() {
                match self.try_execute_step(&step_name, &id_hashes).await {
                    Ok(()) => {
                        todo.remove(&step_name);
                        progressed = true;
                        break;
                    },
                    Err(RunnerError::NotYetAvailable(id)) => {
                        debug!("step runner: '{step_name}' still waiting on '{id}'");
                        continue;
                    },
                    Err(err) => return Err(err),
                }
            }

            if !progressed {
                if self.cancel.is_cancelled() {
                    return Err(RunnerError::Cancelled);
                }
                let delay = self.back_off.next(idle_scans);
                idle_scans = idle_scans.saturating_add(1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = self.cancel.notify.notified() => return Err(RunnerError::Cancelled),
                }
            } else {
                idle_scans = 0;
            }
        }

        info!("step runner: completed this site's share of job");
        Ok(())
    }

    /// Attempts one step. `Ok(())` means the step ran and its outputs were
    /// stored; `Err(NotYetAvailable)` means an input or the compute asset
    /// wasn't ready yet, so the caller should skip this step this scan
    /// rather than abort the job.
    async fn try_execute_step(&self, step_name: &str, id_hashes: &std::collections::BTreeMap<String, String>) -> Result<(), RunnerError> {
        let step = self.job.workflow.step(step_name).expect("step named in todo exists in workflow");

        let mut inputs = std::collections::BTreeMap::new();
        for (input_name, source) in &step.inputs {
            let (site, asset_id) = self.job.resolve_source(source, &self.plan.step_sites, id_hashes)?;
            let asset = self.fetcher.retrieve(&site, &asset_id, &self.this_site).await?;
            let data = asset.as_data().ok_or_else(|| RunnerError::ExpectedDataAsset(asset_id.clone()))?;
            inputs.insert(input_name.clone(), data.data.clone());
        }

        let compute_site = step.compute_asset_id.location()?;
        let compute_asset = self.fetcher.retrieve(&compute_site, &step.compute_asset_id, &self.this_site).await?;
        let compute: &ComputeAsset = compute_asset.as_compute().ok_or_else(|| RunnerError::ExpectedComputeAsset(step.compute_asset_id.clone()))?;

        let kernel = self.kernels.get(&compute.kernel)?;
        let outputs = kernel.run(inputs).await?;

        let sub = self.job.sub_job(step_name);
        for (output_name, value) in outputs {
            let item = format!("{step_name}.{output_name}");
            let hash = id_hashes.get(&item).cloned().unwrap_or_default();
            let result_id = Identifier::from_id_hash(hash)?;
            let asset = Asset::Data(DataAsset { id: result_id, data: value, metadata: Metadata::derived(sub.clone(), item) });
            self.store.store(asset).await?;
        }

        Ok(())
    }
}

/// Evaluates `job`'s policy and checks every local step's four binding
/// classes against it, mirroring `_is_legal()`: every input, every input's
/// source, the compute binding, and every output must be authorized for the
/// site or source site in question.
///
/// Exposed standalone (not just as part of [`JobRun::run`]) so a caller
/// accepting a submission over the wire can audit-log the verdict before
/// handing the job to a runner — which re-checks it anyway at job start,
/// against whatever replica snapshot it holds then.
pub async fn check_legality(job: &Job, plan: &Plan, this_site: &Identifier, resolver: &dyn NamespaceResolver) -> Result<(), RunnerError> {
    let evaluated = policy::evaluate(job, resolver).await?;
    let id_hashes = job.id_hashes();

    for (step_name, step) in &job.workflow.steps {
        if plan.site_for(step_name) != Some(this_site) {
            continue;
        }

        for (input_name, source) in &step.inputs {
            let input_item = format!("{step_name}.{input_name}");
            let perm = evaluated.get(&input_item)?;
            if !evaluated.may_access(perm, this_site) {
                return illegal(step_name, format!("'{this_site}' may not receive input '{input_name}'"));
            }

            let (source_site, _) = job.resolve_source(source, &plan.step_sites, &id_hashes)?;
            let source_label = source.render();
            let source_perm = evaluated.get(&source_label)?;
            if !evaluated.may_access(source_perm, &source_site) {
                return illegal(step_name, format!("'{source_site}' may not release '{source_label}'"));
            }
        }

        let compute_perm = evaluated.get(step_name)?;
        if !evaluated.may_access(compute_perm, this_site) {
            return illegal(step_name, format!("'{this_site}' may not run this step's compute asset"));
        }

        for output_name in &step.outputs {
            let output_item = format!("{step_name}.{output_name}");
            let output_perm = evaluated.get(&output_item)?;
            if !evaluated.may_access(output_perm, this_site) {
                return illegal(step_name, format!("'{this_site}' may not hold output '{output_name}'"));
            }
        }
    }

    Ok(())
}

fn illegal(step: &str, reason: String) -> Result<(), RunnerError> {
    warn!("step runner: job rejected at step '{step}': {reason}");
    Err(RunnerError::IllegalJob { step: step.to_string(), reason })
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use asset_store::{AssetStore, InMemoryAssetStore, StoreError};
    use async_trait::async_trait;
    use policy::{IdPattern, PolicyError, PolicySource, Rule};
    use serde_json::Value;
    use workflow::{ComputeAsset, DataAsset, Source, Workflow, WorkflowStep};

    use super::*;

    struct StaticSource(Vec<Rule>);

    #[async_trait]
    impl PolicySource for StaticSource {
        async fn rules_for(&self, _namespace: &str) -> Result<Vec<Rule>, PolicyError> { Ok(self.0.clone()) }
    }

    struct StaticResolver(Arc<StaticSource>);

    #[async_trait]
    impl NamespaceResolver for StaticResolver {
        async fn policy_source_for(&self, _namespace: &str) -> Result<Arc<dyn PolicySource>, PolicyError> { Ok(self.0.clone()) }
    }

    /// Routes every retrieval through one shared store, translating its
    /// errors into the distinction a runner cares about: missing (benign,
    /// retry later) versus denied (fatal).
    struct StoreFetcher(Arc<dyn AssetStore>);

    #[async_trait]
    impl AssetFetcher for StoreFetcher {
        async fn retrieve(&self, _site: &Identifier, id: &Identifier, requester: &Identifier) -> Result<Asset, RunnerError> {
            match self.0.retrieve(id, requester).await {
                Ok(asset) => Ok(asset),
                Err(StoreError::NotFound(id)) => Err(RunnerError::NotYetAvailable(id)),
                Err(StoreError::AccessDenied { id, requester }) => Err(RunnerError::AccessDenied { site: id.location().unwrap_or_else(|_| Identifier::wildcard()), id, requester }),
                Err(other) => Err(RunnerError::Store(other)),
            }
        }
    }

    struct IdentityKernel;

    #[async_trait]
    impl crate::kernel::Kernel for IdentityKernel {
        async fn run(&self, mut inputs: BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, RunnerError> {
            let v = inputs.remove("in").unwrap_or(Value::Null);
            Ok(BTreeMap::from([("y".to_string(), v)]))
        }
    }

    fn rules_granting_full_access() -> Vec<Rule> {
        vec![
            Rule::ResultOfDataIn { data_pattern: IdPattern::parse("asset:ns1:x:ns1:s1"), collection: IdPattern::parse("asset_collection:ns1:c1") },
            Rule::ResultOfComputeIn {
                compute_pattern: IdPattern::parse("asset:ns1:identity:ns1:s1"),
                collection: IdPattern::parse("asset_collection:ns1:c1"),
            },
            Rule::MayAccessCollection { collection: IdPattern::parse("asset_collection:ns1:c1"), party_or_collection: IdPattern::parse("site:ns1:s1") },
            Rule::MayAccess { asset_or_collection: IdPattern::parse("asset:ns1:identity:ns1:s1"), party_or_collection: IdPattern::parse("site:ns1:s1") },
        ]
    }

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
            outputs: vec![workflow::Source::Step { step: "A".into(), output: "y".into() }],
        };
        Job { workflow, inputs: BTreeMap::from([("x".to_string(), Identifier::parse("asset:ns1:x:ns1:s1").unwrap())]) }
    }

    fn this_site() -> Identifier { Identifier::parse("site:ns1:s1").unwrap() }

    fn make_run(rules: Vec<Rule>, store: Arc<dyn AssetStore>) -> JobRun {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules))));
        let mut kernels = KernelRegistry::new();
        kernels.register("identity", Arc::new(IdentityKernel));
        JobRun {
            job: single_step_job(),
            plan: Plan { step_sites: BTreeMap::from([("A".to_string(), this_site())]) },
            this_site: this_site(),
            resolver,
            fetcher: Arc::new(StoreFetcher(store.clone())),
            store,
            kernels: Arc::new(kernels),
            back_off: BackOff { initial: Duration::from_millis(5), max: Duration::from_millis(20) },
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn legality_check_passes_with_full_grant() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules_granting_full_access()))));
        let store: Arc<dyn AssetStore> = Arc::new(InMemoryAssetStore::new(resolver));
        let run = make_run(rules_granting_full_access(), store);
        assert!(check_legality(&run.job, &run.plan, &run.this_site, run.resolver.as_ref()).await.is_ok());
    }

    #[tokio::test]
    async fn legality_check_rejects_without_output_grant() {
        let rules = vec![
            Rule::ResultOfDataIn { data_pattern: IdPattern::parse("asset:ns1:x:ns1:s1"), collection: IdPattern::parse("asset_collection:ns1:c1") },
            Rule::ResultOfComputeIn {
                compute_pattern: IdPattern::parse("asset:ns1:identity:ns1:s1"),
                collection: IdPattern::parse("asset_collection:ns1:c1"),
            },
        ];
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules.clone()))));
        let store: Arc<dyn AssetStore> = Arc::new(InMemoryAssetStore::new(resolver));
        let run = make_run(rules, store);
        let err = check_legality(&run.job, &run.plan, &run.this_site, run.resolver.as_ref()).await.unwrap_err();
        assert!(matches!(err, RunnerError::IllegalJob { .. }));
    }

    #[tokio::test]
    async fn step_attempt_is_skipped_when_input_not_yet_available() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules_granting_full_access()))));
        let store: Arc<dyn AssetStore> = Arc::new(InMemoryAssetStore::new(resolver));
        let run = make_run(rules_granting_full_access(), store);
        let id_hashes = run.job.id_hashes();
        let err = run.try_execute_step("A", &id_hashes).await.unwrap_err();
        assert!(matches!(err, RunnerError::NotYetAvailable(_)));
    }

    #[tokio::test]
    async fn run_to_completion_stores_the_output() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules_granting_full_access()))));
        let store: Arc<dyn AssetStore> = Arc::new(InMemoryAssetStore::new(resolver));
        store
            .store(Asset::Data(DataAsset {
                id: Identifier::parse("asset:ns1:x:ns1:s1").unwrap(),
                data: serde_json::json!(42),
                metadata: Metadata::primary(),
            }))
            .await
            .unwrap();
        store
            .store(Asset::Compute(ComputeAsset { id: Identifier::parse("asset:ns1:identity:ns1:s1").unwrap(), kernel: "identity".to_string(), metadata: Metadata::primary() }))
            .await
            .unwrap();

        let run = make_run(rules_granting_full_access(), store.clone());
        run.run().await.unwrap();

        let hash = run.job.id_hash("A", "y");
        let result_id = Identifier::from_id_hash(hash).unwrap();
        let stored = store.retrieve(&result_id, &this_site()).await.unwrap();
        assert_eq!(stored.as_data().unwrap().data, serde_json::json!(42));
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_scans() {
        let resolver = Arc::new(StaticResolver(Arc::new(StaticSource(rules_granting_full_access()))));
        let store: Arc<dyn AssetStore> = Arc::new(InMemoryAssetStore::new(resolver));
        let run = make_run(rules_granting_full_access(), store);
        run.cancel.cancel();
        let err = run.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
    }
}
