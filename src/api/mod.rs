//! HTTP ingestion surface.
//!
//! # Routes
//!
//! - `POST /tasks` - Submit a task (`{"priority": "high", "payload": {...}}`)
//! - `GET /tasks/:id` - Get a task's latest status
//! - `GET /health` - Health check

use std::future::IntoFuture;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/tasks", post(routes::submit_task))
        .route("/tasks/:id", get(routes::get_task))
        .route("/health", get(routes::health_check))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` is cancelled.
///
/// After cancellation, in-flight requests get `drain_timeout` to finish
/// before the server is aborted.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let signal = shutdown.clone();
    let server = axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .into_future();
    let mut server = tokio::spawn(server);
    info!(%addr, "API server listening");

    tokio::select! {
        res = &mut server => return flatten(res),
        _ = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(res) => {
            info!("API server stopped");
            flatten(res)
        }
        Err(_) => {
            warn!(timeout_secs = drain_timeout.as_secs(), "API drain timed out, aborting");
            server.abort();
            Ok(())
        }
    }
}

fn flatten(res: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) -> Result<()> {
    match res {
        Ok(inner) => Ok(inner?),
        Err(e) => Err(Error::Other(format!("API server task failed: {e}"))),
    }
}
