//! Entrypoint to the `ddm-registry` binary: the federation's single
//! canonical store of parties and sites, served over HTTP for every site's
//! `RegistryClient` to replicate.

use std::net::SocketAddr;
use std::sync::Arc;

use auth_resolver::AuthResolver;
use clap::Parser;
use error_trace::ErrorTrace as _;
use humanlog::{DebugMode, HumanLogger};
use log::{error, info};
use registry::Registry;
use srv::RegistrySrv;

#[path = "../auth.rs"]
mod auth;
#[path = "../logger.rs"]
mod logger;

use crate::auth::MockAuthResolver;
use crate::logger::FileLogger;

#[derive(Debug, Parser)]
struct Arguments {
    /// If given, enables more verbose debugging.
    #[clap(long, global = true)]
    trace: bool,

    /// The address on which to bind the registry's HTTP server.
    #[clap(short, long, env, default_value = "127.0.0.1:3031")]
    address: SocketAddr,

    /// How long a replica's lease stays valid before it must poll again.
    #[clap(long, env, default_value_t = 60)]
    lease_secs: i64,

    /// Where to append the registry's audit log.
    #[clap(long, env, default_value = "./registry-audit-log.log")]
    audit_log: std::path::PathBuf,

    /// The party identifier every request is authenticated as, absent a
    /// real identity provider in front of this registry.
    #[clap(long, env, default_value = "party:ddm:registry-admin")]
    admin_party: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Arguments::parse();

    if let Err(err) = HumanLogger::terminal(if args.trace { DebugMode::Full } else { DebugMode::Debug }).init() {
        eprintln!("WARNING: Failed to setup logger: {err} (no logging for this session)");
    }
    info!("{} registry - v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let admin_party = match identifier::Identifier::parse(&args.admin_party) {
        Ok(id) => id,
        Err(err) => {
            error!("'{}' is not a valid party identifier: {}", args.admin_party, err.trace());
            std::process::exit(1);
        },
    };

    let audit: Arc<dyn audit_logger::AuditLogger> = match FileLogger::new(&args.audit_log).await {
        Ok(logger) => Arc::new(logger),
        Err(err) => {
            error!("could not open audit log '{}': {err}", args.audit_log.display());
            std::process::exit(1);
        },
    };
    let auth: Arc<dyn AuthResolver> = Arc::new(MockAuthResolver::new(admin_party));
    let registry = Arc::new(Registry::new(chrono::Duration::seconds(args.lease_secs)));

    let server = RegistrySrv::new(args.address, audit, auth, registry);
    srv::run_registry(Arc::new(server)).await;
}
