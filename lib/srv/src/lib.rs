//! warp-based HTTP facades for a site and for the registry:
//! route composition, authentication, and rejection-to-status mapping.
//! Neither facade dials another site or the registry itself — that
//! cross-site transport is out of scope and lives in the
//! binaries that construct these facades.

pub mod models;
pub mod problem;
pub mod registry_srv;
pub mod site;

use std::time::Duration;

use error_trace::trace;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, Signal, SignalKind};
use warp::reject::Rejection;
use warp::reply::Reply;
use warp::Filter;

pub use problem::Problem;
pub use registry_srv::RegistrySrv;
pub use site::SiteSrv;

#[derive(Serialize, Deserialize)]
struct PingResponse {
    success: bool,
    ping: String,
}

fn ping() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::get().and(warp::path("ping")).and(warp::path::end()).map(|| warp::reply::json(&PingResponse { success: true, ping: "pong".to_string() }))
}

/// Maps the rejections the two facades raise to HTTP statuses, mirroring the
/// teacher's `Srv::run` recover closure.
fn recover(err: Rejection) -> Result<Box<dyn Reply>, Rejection> {
    debug!("srv: rejection: {err:?}");
    if let Some(auth_resolver::AuthResolverError { .. }) = err.find() {
        return Ok(Box::new(warp::reply::with_status(warp::reply::reply(), warp::http::StatusCode::UNAUTHORIZED)));
    }
    if let Some(audit_logger::Error::CouldNotDeliver(_)) = err.find() {
        return Ok(Box::new(warp::reply::with_status(warp::reply::reply(), warp::http::StatusCode::INTERNAL_SERVER_ERROR)));
    }
    if let Some(problem) = err.find::<Problem>() {
        let status = problem.0.status.unwrap_or(warp::http::StatusCode::BAD_REQUEST);
        return Ok(Box::new(warp::reply::with_status(warp::reply::json(&problem.0), status)));
    }
    Err(err)
}

/// Serves `site` until SIGTERM/SIGINT, behind the shared recover filter.
pub async fn run_site(site: std::sync::Arc<SiteSrv>) {
    let addr = site.addr();
    let index = warp::any().and(site.into_routes().or(ping())).recover(recover);
    let (addr, srv) = warp::serve(index).bind_with_graceful_shutdown(addr, graceful_signal());
    info!("site server: now serving at {addr}; ready for requests");
    srv.await;
}

/// Serves `registry` until SIGTERM/SIGINT, behind the shared recover filter.
pub async fn run_registry(registry: std::sync::Arc<RegistrySrv>) {
    let addr = registry.addr();
    let index = warp::any().and(registry.into_routes().or(ping())).recover(recover);
    let (addr, srv) = warp::serve(index).bind_with_graceful_shutdown(addr, graceful_signal());
    info!("registry server: now serving at {addr}; ready for requests");
    srv.await;
}

/// Resolves only once SIGTERM or SIGINT arrives, for `bind_with_graceful_shutdown`.
async fn graceful_signal() {
    let term_handler: Option<Signal> = match signal(SignalKind::terminate()) {
        Ok(handler) => Some(handler),
        Err(err) => {
            error!("{}", trace!(("Failed to register SIGTERM signal handler"), err));
            warn!("Service will NOT shutdown gracefully on SIGTERM");
            None
        },
    };

    let int_handler: Option<Signal> = match signal(SignalKind::interrupt()) {
        Ok(handler) => Some(handler),
        Err(err) => {
            error!("{}", trace!(("Failed to register SIGINT signal handler"), err));
            warn!("Service will NOT shutdown gracefully on SIGINT");
            None
        },
    };

    match (term_handler, int_handler) {
        (Some(mut term), Some(mut int)) => tokio::select! {
            _ = term.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            _ = int.recv() => info!("Received SIGINT, shutting down gracefully..."),
        },
        (Some(mut term), None) => {
            term.recv().await;
            info!("Received SIGTERM, shutting down gracefully...");
        },
        (None, Some(mut int)) => {
            int.recv().await;
            info!("Received SIGINT, shutting down gracefully...");
        },
        (None, None) => loop {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        },
    }
}
