//! Bookkeeping for in-flight jobs: one [`tokio::spawn`]ed worker per job
//! (mirroring `step_runner.py`'s one-`Thread`-per-job `StepRunner`), with a
//! queryable status and cooperative cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use identifier::Identifier;
use log::{error, info};
use policy::NamespaceResolver;
use registry::RegistryClient;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;
use workflow::{Job, Plan};

use crate::error::RunnerError;
use crate::fetch::AssetFetcher;
use crate::job_run::{BackOff, CancelToken, JobRun};
use crate::kernel::KernelRegistry;

/// Where one submitted job currently stands.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Executing,
    Done,
    Failed(String),
    Cancelled,
}

struct Handle {
    status: Arc<RwLock<JobStatus>>,
    cancel: CancelToken,
}

/// Runs jobs submitted to this site, one worker task each.
pub struct StepRunnerService {
    this_site: Identifier,
    resolver: Arc<dyn NamespaceResolver>,
    fetcher: Arc<dyn AssetFetcher>,
    store: Arc<dyn asset_store::AssetStore>,
    kernels: Arc<KernelRegistry>,
    registry: Arc<RegistryClient>,
    back_off: BackOff,
    jobs: RwLock<BTreeMap<Uuid, Handle>>,
}

impl StepRunnerService {
    pub fn new(
        this_site: Identifier,
        resolver: Arc<dyn NamespaceResolver>,
        fetcher: Arc<dyn AssetFetcher>,
        store: Arc<dyn asset_store::AssetStore>,
        kernels: Arc<KernelRegistry>,
        registry: Arc<RegistryClient>,
    ) -> Self {
        Self { this_site, resolver, fetcher, store, kernels, registry, back_off: BackOff::default(), jobs: RwLock::new(BTreeMap::new()) }
    }

    pub fn with_back_off(mut self, back_off: BackOff) -> Self {
        self.back_off = back_off;
        self
    }

    /// Rejects any site assigned a step in `plan` that either isn't
    /// registered or is registered without a runner; a site with no runner
    /// can never make progress on the step assigned to it.
    async fn check_runners(&self, plan: &Plan) -> Result<(), RunnerError> {
        let mut checked = std::collections::BTreeSet::new();
        for site_id in plan.step_sites.values() {
            if !checked.insert(site_id.clone()) {
                continue;
            }
            match self.registry.get_site_by_id(site_id).await {
                Ok(site) if site.has_runner => {},
                _ => return Err(RunnerError::InvalidPlan),
            }
        }
        Ok(())
    }

    /// Submits `job`/`plan` for execution; checks the plan covers the
    /// workflow and that every site it assigns a step to has a runner, up
    /// front, so malformed submissions fail immediately rather than
    /// mid-scan. Returns the job id a caller uses to poll status or cancel.
    pub async fn submit(&self, job: Job, plan: Plan) -> Result<Uuid, RunnerError> {
        if !plan.covers(&job.workflow) {
            return Err(RunnerError::InvalidPlan);
        }
        self.check_runners(&plan).await?;

        let id = Uuid::new_v4();
        let status = Arc::new(RwLock::new(JobStatus::Pending));
        let cancel = CancelToken::new();
        self.jobs.write().await.insert(id, Handle { status: status.clone(), cancel: cancel.clone() });

        let run = JobRun {
            job,
            plan,
            this_site: self.this_site.clone(),
            resolver: self.resolver.clone(),
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            kernels: self.kernels.clone(),
            back_off: self.back_off,
            cancel,
        };

        tokio::spawn(async move {
            *status.write().await = JobStatus::Executing;
            match run.run().await {
                Ok(()) => {
                    info!("step runner: job {id} done");
                    *status.write().await = JobStatus::Done;
                },
                Err(RunnerError::Cancelled) => {
                    *status.write().await = JobStatus::Cancelled;
                },
                Err(err) => {
                    error!("step runner: job {id} failed: {err}");
                    *status.write().await = JobStatus::Failed(err.to_string());
                },
            }
        });

        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Result<JobStatus, RunnerError> {
        let jobs = self.jobs.read().await;
        let handle = jobs.get(&id).ok_or(RunnerError::UnknownJob)?;
        Ok(handle.status.read().await.clone())
    }

    /// Requests cancellation; the worker observes it between steps and before
    /// its next back-off sleep, never mid-step.
    pub async fn cancel(&self, id: Uuid) -> Result<(), RunnerError> {
        let jobs = self.jobs.read().await;
        let handle = jobs.get(&id).ok_or(RunnerError::UnknownJob)?;
        handle.cancel.cancel();
        Ok(())
    }
}
