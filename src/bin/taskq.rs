//! taskq CLI: run the scheduler, submit tasks, inspect status.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskq::api::{self, AppState};
use taskq::config::secrets::{ExposeSecret, SecretString};
use taskq::config::{Config, store_url_from_env, transport_url_from_env};
use taskq::db::{DEFAULT_MAX_CONNECTIONS, Db};
use taskq::engine::{SimulatedExecutor, WorkerContext, WorkerPool};
use taskq::error::Error;
use taskq::ingest::Ingestion;
use taskq::model::{NewTask, Priority, Task, TaskId};
use taskq::store::StatusStore;
use taskq::telemetry::metrics::{MetricsSink, NoopMetrics, OtelMetrics};
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use taskq::transport::{DeliveryTransport, PgmqConfig, PgmqTransport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "taskq", about = "Priority task scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and the HTTP ingestion API
    Serve,
    /// Submit a task
    Submit {
        /// Priority class: low, medium or high
        priority: Priority,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },
    /// Show a task's latest status
    Status {
        /// Task ID (full UUID)
        id: TaskId,
    },
}

struct Backends {
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<dyn StatusStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve(Config::from_env()?).await,
        Command::Submit { priority, payload } => cmd_submit(priority, payload).await,
        Command::Status { id } => cmd_status(id).await,
    }
}

async fn connect(
    transport_url: &SecretString,
    store_url: &SecretString,
    transport_pool_size: u32,
    pgmq: PgmqConfig,
) -> anyhow::Result<Backends> {
    let transport_db = Db::connect_with_max(transport_url.expose_secret(), transport_pool_size)
        .await
        .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
    transport_db.migrate().await?;

    let store_db = Db::connect(store_url.expose_secret())
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;
    store_db.migrate().await?;

    let transport = PgmqTransport::new(Arc::new(transport_db), pgmq);
    transport.setup().await?;

    Ok(Backends {
        transport: Arc::new(transport),
        store: Arc::new(store_db),
    })
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(
        TelemetryConfig::new("taskq")
            .endpoint(config.otel_endpoint.clone())
            .default_filter(config.log_level.clone())
            .attribute("taskq.worker_count", config.worker_count as i64)
            .attribute("taskq.max_attempts", i64::from(config.max_attempts.unwrap_or(0)))
            .attribute(
                "taskq.visibility_timeout_secs",
                i64::from(config.visibility_timeout_secs),
            ),
    )?;

    let backends = connect(
        &config.transport_url,
        &config.store_url,
        config.transport_pool_size(),
        config.pgmq_config(),
    )
    .await?;
    // Created after telemetry so instruments bind to the installed provider.
    let metrics: Arc<dyn MetricsSink> = Arc::new(OtelMetrics::new());

    let mut pool = WorkerPool::spawn(
        config.worker_count,
        WorkerContext {
            transport: Arc::clone(&backends.transport),
            store: Arc::clone(&backends.store),
            executor: Arc::new(SimulatedExecutor::new(config.executor_config())),
            metrics: Arc::clone(&metrics),
        },
        config.worker_config(),
    );

    let ingestion = Ingestion::new(backends.transport, backends.store, metrics);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal.cancel();
    });

    let mut server = tokio::spawn(api::serve(
        listener,
        AppState::new(ingestion),
        shutdown.clone(),
        config.shutdown_timeout,
    ));

    // A worker exiting before shutdown takes the whole process down, so a
    // supervisor can restart it.
    let mut server_done = false;
    let worker_failure = tokio::select! {
        exit = pool.first_exit() => exit.err(),
        _ = shutdown.cancelled() => None,
        res = &mut server => {
            // The server stopped on its own; stop the workers too.
            server_done = true;
            res??;
            None
        }
    };
    if let Some(e) = &worker_failure {
        error!("{e}, shutting down");
    }

    shutdown.cancel();
    pool.shutdown();
    if !server_done {
        server.await??;
    }
    let joined = pool.join().await;

    if let Some(e) = worker_failure {
        return Err(e.into());
    }
    joined?;
    info!("scheduler stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn cmd_submit(priority: Priority, payload: Option<String>) -> anyhow::Result<()> {
    let payload: serde_json::Value = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };

    let backends = connect(
        &transport_url_from_env()?,
        &store_url_from_env()?,
        DEFAULT_MAX_CONNECTIONS,
        PgmqConfig::default(),
    )
    .await?;
    let ingestion = Ingestion::new(backends.transport, backends.store, Arc::new(NoopMetrics));
    let task = ingestion
        .submit(NewTask::new(priority).payload(payload))
        .await?;

    println!("Submitted: {} (priority: {}, status: {})", task.id, task.priority, task.status);
    Ok(())
}

async fn cmd_status(id: TaskId) -> anyhow::Result<()> {
    let store_db = Db::connect(store_url_from_env()?.expose_secret()).await?;
    let task = store_db.get(id).await?;
    print_task(&task)?;
    Ok(())
}

fn print_task(task: &Task) -> anyhow::Result<()> {
    println!("ID:         {}", task.id);
    println!("Priority:   {}", task.priority);
    println!("Status:     {}", task.status);
    println!("Attempts:   {}", task.attempts);
    println!("Created:    {}", task.created_at);
    println!(
        "Payload:    {}",
        serde_json::to_string_pretty(&task.payload)?
    );
    Ok(())
}
