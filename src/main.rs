//! Entrypoint to the `ddm-site` binary: one cooperating site in a federated
//! data processing platform, wiring together a registry
//! replica, a namespace resolver, a local asset store, a step runner, and
//! the HTTP facade that fronts them all.

use std::sync::Arc;

use asset_store::InMemoryAssetStore;
use auth_resolver::AuthResolver;
use clap::Parser;
use error_trace::ErrorTrace as _;
use humanlog::{DebugMode, HumanLogger};
use log::{error, info};
use registry::{RegisteredObject, RegistryClient, Replica};
use srv::SiteSrv;
use step_runner::{KernelRegistry, StepRunnerService};

mod auth;
mod config;
mod http_client;
mod logger;
mod policy_source;

use crate::auth::{JwtConfig, JwtResolver, KidResolver, MockAuthResolver};
use crate::config::{Arguments, SiteConfig};
use crate::http_client::{HttpAssetFetcher, HttpUpdateSource};
use crate::logger::FileLogger;
use crate::policy_source::{build_hosted_server, SiteNamespaceResolver};

/// Builds the JWT-backed resolver a `jwt_config`/jwk pairing describes, or
/// falls back to a resolver that always authenticates as the site's own
/// identifier, for local runs with no identity provider in front of them.
fn build_auth_resolver(cfg: &SiteConfig) -> Arc<dyn AuthResolver> {
    let Some(jwt_config_path) = &cfg.jwt_config else {
        info!("no 'jwt_config' given; authenticating every request as '{}'", cfg.site_id);
        return Arc::new(MockAuthResolver::new(cfg.site_id.clone()));
    };

    let jwk_set = jwt_config_path.with_file_name("jwk_set.json");
    let kid_resolver = match KidResolver::new(jwk_set.to_string_lossy().as_ref()) {
        Ok(r) => r,
        Err(err) => {
            error!("could not load jwk set from '{}': {err}", jwk_set.display());
            std::process::exit(1);
        },
    };
    let raw = match std::fs::read_to_string(jwt_config_path) {
        Ok(r) => r,
        Err(err) => {
            error!("could not read '{}': {err}", jwt_config_path.display());
            std::process::exit(1);
        },
    };
    let jwt_cfg: JwtConfig = match serde_json::from_str(&raw) {
        Ok(c) => c,
        Err(err) => {
            error!("could not parse '{}': {err}", jwt_config_path.display());
            std::process::exit(1);
        },
    };
    Arc::new(JwtResolver::new(jwt_cfg, kid_resolver))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Arguments::parse();

    if let Err(err) = HumanLogger::terminal(if args.trace { DebugMode::Full } else { DebugMode::Debug }).init() {
        eprintln!("WARNING: Failed to setup logger: {err} (no logging for this session)");
    }
    info!("{} - v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let cfg = match SiteConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("{}", err.trace());
            std::process::exit(1);
        },
    };

    let http = reqwest::Client::new();

    let registry_source: Arc<dyn registry::UpdateSource<RegisteredObject>> = Arc::new(HttpUpdateSource::new(http.clone(), cfg.registry_endpoint.clone()));
    let registry_replica = Arc::new(Replica::new(registry_source));
    if let Err(err) = registry_replica.update().await {
        error!("could not reach registry at '{}': {err}", cfg.registry_endpoint);
        std::process::exit(1);
    }
    let registry_client = RegistryClient::new(registry_replica.clone());
    let runner_registry_client = Arc::new(RegistryClient::new(registry_replica));

    let hosted = match (&cfg.hosted_namespace, &cfg.rules_file) {
        (Some(namespace), rules_file) => {
            let rules: Vec<policy::Rule> = match rules_file {
                Some(path) => match std::fs::read_to_string(path)
                    .and_then(|raw| serde_json::from_str(&raw).map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)))
                {
                    Ok(rules) => rules,
                    Err(err) => {
                        error!("could not load rules from '{}': {err}", path.display());
                        std::process::exit(1);
                    },
                },
                None => Vec::new(),
            };
            let (store, server) = match build_hosted_server(rules, chrono::Duration::from_std(cfg.replica_lease_refresh).unwrap_or(chrono::Duration::seconds(60))).await {
                Ok(built) => built,
                Err(err) => {
                    error!("could not seed hosted policy store for namespace '{namespace}': {err}");
                    std::process::exit(1);
                },
            };
            Some((namespace.clone(), store, server))
        },
        _ => None,
    };

    let resolver: Arc<SiteNamespaceResolver> = Arc::new(SiteNamespaceResolver::new(
        cfg.policy_sources.clone(),
        http.clone(),
        hosted.as_ref().map(|(namespace, store, _)| (namespace.clone(), store.clone())),
    ));

    let store = Arc::new(InMemoryAssetStore::new(resolver.clone()));
    let fetcher = Arc::new(HttpAssetFetcher::new(http.clone(), registry_client));
    let kernels = Arc::new(KernelRegistry::new());
    let runner =
        Arc::new(StepRunnerService::new(cfg.site_id.clone(), resolver.clone(), fetcher, store.clone(), kernels, runner_registry_client).with_back_off(cfg.step_backoff));

    let audit = match FileLogger::new(&cfg.audit_log_path).await {
        Ok(logger) => Arc::new(logger),
        Err(err) => {
            error!("could not open audit log '{}': {err}", cfg.audit_log_path.display());
            std::process::exit(1);
        },
    };
    let auth = build_auth_resolver(&cfg);

    let mut site = SiteSrv::new(args.address, cfg.site_id.clone(), audit, auth, store, runner, resolver.clone());
    if let Some((_, _, server)) = hosted {
        site = site.with_policy_server(Arc::new(server));
    }

    srv::run_site(Arc::new(site)).await;
}
