//! A file-backed [`AuditLogger`]: one JSON line per event, appended under a
//! lock, defaulting to `./audit-log.log`.

use std::path::PathBuf;

use audit_logger::{AuditLogger, Error, LegalityVerdict};
use auth_resolver::AuthContext;
use identifier::Identifier;
use registry::{Party, Site};
use serde::Serialize;
use step_runner::JobStatus;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use workflow::{Job, Plan};

#[derive(Serialize)]
struct Record<'a> {
    at: chrono::DateTime<chrono::Utc>,
    reference: Option<&'a str>,
    event: &'a str,
    #[serde(flatten)]
    body: serde_json::Value,
}

pub struct FileLogger {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl FileLogger {
    pub async fn new(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    async fn append(&self, reference: Option<&str>, event: &str, body: serde_json::Value) -> Result<(), Error> {
        let record = Record { at: chrono::Utc::now(), reference, event, body };
        let mut line = serde_json::to_string(&record).map_err(|err| Error::CouldNotDeliver(err.to_string()))?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await.map_err(|err| Error::CouldNotDeliver(format!("{}: {err}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditLogger for FileLogger {
    async fn log_job_submission(&self, reference: &str, auth: &AuthContext, job: &Job, plan: &Plan) -> Result<(), Error> {
        self.append(Some(reference), "job_submission", serde_json::json!({"auth": auth.party, "job": job, "plan": plan})).await
    }

    async fn log_legality_verdict(&self, reference: &str, verdict: &LegalityVerdict) -> Result<(), Error> {
        self.append(Some(reference), "legality_verdict", serde_json::json!({"verdict": verdict})).await
    }

    async fn log_step_transition(&self, reference: &str, step: &str, status: &JobStatus) -> Result<(), Error> {
        self.append(Some(reference), "step_transition", serde_json::json!({"step": step, "status": status})).await
    }

    async fn log_asset_access_request(&self, reference: &str, auth: &AuthContext, asset: &Identifier) -> Result<(), Error> {
        self.append(Some(reference), "asset_access_request", serde_json::json!({"auth": auth.party, "asset": asset})).await
    }

    async fn log_asset_access_response(&self, reference: &str, asset: &Identifier, granted: bool) -> Result<(), Error> {
        self.append(Some(reference), "asset_access_response", serde_json::json!({"asset": asset, "granted": granted})).await
    }

    async fn log_party_registration(&self, auth: &AuthContext, party: &Party, registered: bool) -> Result<(), Error> {
        self.append(None, "party_registration", serde_json::json!({"auth": auth.party, "party": party, "registered": registered})).await
    }

    async fn log_site_registration(&self, auth: &AuthContext, site: &Site, registered: bool) -> Result<(), Error> {
        self.append(None, "site_registration", serde_json::json!({"auth": auth.party, "site": site, "registered": registered})).await
    }
}
