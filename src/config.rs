//! Configuration recognised by a site: a small `clap` surface
//! for the bind address and the config file location, the file itself
//! parsed as TOML directly into a struct.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use identifier::Identifier;
use serde::Deserialize;
use step_runner::BackOff;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file '{0}': {1}")]
    Read(String, std::io::Error),
    #[error("could not parse config file '{0}' as TOML: {1}")]
    Parse(String, toml::de::Error),
    #[error("config field 'site_id' is not a valid identifier: {0}")]
    SiteId(#[from] identifier::IdentifierError),
}

/// Command-line surface: just enough to find the real configuration and to
/// turn on more verbose logging.
#[derive(Debug, Parser)]
pub struct Arguments {
    /// If given, enables more verbose debugging.
    #[clap(long, global = true)]
    pub trace: bool,

    /// The address on which to bind this site's HTTP server.
    #[clap(short, long, env, default_value = "127.0.0.1:3030")]
    pub address: SocketAddr,

    /// Path to this site's TOML configuration file.
    #[clap(short, long, env, default_value = "./site.toml")]
    pub config: PathBuf,
}

#[derive(Deserialize)]
struct RawSiteConfig {
    site_id: String,
    registry_endpoint: String,
    #[serde(default)]
    policy_sources: BTreeMap<String, String>,
    #[serde(default)]
    hosted_namespace: Option<String>,
    #[serde(default)]
    rules_file: Option<PathBuf>,
    #[serde(default)]
    replica_lease_refresh_secs: Option<u64>,
    #[serde(default)]
    step_backoff_initial_ms: Option<u64>,
    #[serde(default)]
    step_backoff_max_ms: Option<u64>,
    #[serde(default)]
    jwt_config: Option<PathBuf>,
    #[serde(default)]
    audit_log_path: Option<PathBuf>,
}

/// A site's fully-resolved configuration.
pub struct SiteConfig {
    pub site_id: Identifier,
    pub registry_endpoint: String,
    /// `namespace -> policy server URL`, for every namespace this site
    /// consumes rules from but does not itself author.
    pub policy_sources: BTreeMap<String, String>,
    /// If set, this site is the authoritative policy source for this
    /// namespace; `rules_file`, if also set, seeds its rule set at startup.
    pub hosted_namespace: Option<String>,
    pub rules_file: Option<PathBuf>,
    pub replica_lease_refresh: Duration,
    pub step_backoff: BackOff,
    pub jwt_config: Option<PathBuf>,
    pub audit_log_path: PathBuf,
}

impl SiteConfig {
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read(path.display().to_string(), err))?;
        let raw: RawSiteConfig = toml::from_str(&raw).map_err(|err| ConfigError::Parse(path.display().to_string(), err))?;

        Ok(Self {
            site_id: Identifier::parse(raw.site_id)?,
            registry_endpoint: raw.registry_endpoint,
            policy_sources: raw.policy_sources,
            hosted_namespace: raw.hosted_namespace,
            rules_file: raw.rules_file,
            replica_lease_refresh: Duration::from_secs(raw.replica_lease_refresh_secs.unwrap_or(60)),
            step_backoff: BackOff {
                initial: Duration::from_millis(raw.step_backoff_initial_ms.unwrap_or(500)),
                max: Duration::from_millis(raw.step_backoff_max_ms.unwrap_or(8_000)),
            },
            jwt_config: raw.jwt_config,
            audit_log_path: raw.audit_log_path.unwrap_or_else(|| PathBuf::from("./audit-log.log")),
        })
    }
}
