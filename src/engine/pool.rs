//! Worker pool: spawns workers, watches them, and coordinates their shutdown.
//!
//! Workers only return on shutdown or on a transport error. An exit before
//! [`WorkerPool::shutdown`] is therefore a failure of the whole process;
//! [`WorkerPool::first_exit`] surfaces it so the caller can stop serving and
//! let external supervision restart it.

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Error, Result};

use super::worker::{Worker, WorkerConfig, WorkerContext};

/// A set of independent workers sharing one shutdown signal.
pub struct WorkerPool {
    workers: JoinSet<(usize, Result<()>)>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` workers (ids `1..=size`) on the current runtime.
    pub fn spawn(size: usize, ctx: WorkerContext, config: WorkerConfig) -> Self {
        let shutdown = CancellationToken::new();
        let mut workers = JoinSet::new();
        for id in 1..=size {
            let worker = Worker::new(id, ctx.clone(), config.clone());
            let token = shutdown.child_token();
            workers.spawn(async move { (id, worker.run(token).await) });
        }

        info!(workers = size, "worker pool started");
        Self { workers, shutdown }
    }

    /// Stop all workers from taking new deliveries.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until some worker exits.
    ///
    /// Returns `Ok(())` if it exited because of [`WorkerPool::shutdown`] and
    /// an error for any other exit. Cancel-safe, so it can sit in a
    /// `select!` next to the HTTP server. Never resolves for an empty pool.
    pub async fn first_exit(&mut self) -> Result<()> {
        let Some(joined) = self.workers.join_next().await else {
            return std::future::pending().await;
        };

        match worker_result(joined) {
            Err(e) => Err(e),
            Ok(_) if self.shutdown.is_cancelled() => Ok(()),
            Ok(id) => Err(Error::Other(format!("worker {id} exited before shutdown"))),
        }
    }

    /// Wait for every remaining worker to exit.
    ///
    /// Workers that stopped on an error are logged; if any did, the count
    /// is returned as an error once all have exited.
    pub async fn join(mut self) -> Result<()> {
        let mut failed = 0usize;
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = worker_result(joined) {
                failed += 1;
                error!("{e}");
            }
        }

        if failed > 0 {
            return Err(Error::Other(format!("{failed} worker(s) stopped on error")));
        }
        info!("worker pool stopped");
        Ok(())
    }
}

/// Flatten a joined worker into its id or an error naming it.
fn worker_result(
    joined: std::result::Result<(usize, Result<()>), JoinError>,
) -> Result<usize> {
    match joined {
        Ok((id, Ok(()))) => Ok(id),
        Ok((id, Err(e))) => Err(Error::Other(format!("worker {id} stopped: {e}"))),
        Err(e) => Err(Error::Other(format!("worker panicked: {e}"))),
    }
}
