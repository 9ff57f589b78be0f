//! Worker loop tests against the in-memory transport and store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use taskq::engine::{
    ExecutionOutcome, Executor, FixedExecutor, Worker, WorkerConfig, WorkerContext,
};
use taskq::ingest::Ingestion;
use taskq::model::{NewTask, Priority, Status, Task};
use taskq::store::{MemoryStatusStore, StatusStore};
use taskq::telemetry::metrics::RecordingMetrics;
use taskq::transport::{DeliveryTransport, MemoryTransport};
use tokio_util::sync::CancellationToken;

struct Harness {
    transport: MemoryTransport,
    store: Arc<MemoryStatusStore>,
    metrics: Arc<RecordingMetrics>,
    ingestion: Ingestion,
}

fn harness() -> Harness {
    let transport = MemoryTransport::new();
    let store = Arc::new(MemoryStatusStore::new());
    let metrics = Arc::new(RecordingMetrics::new());
    let ingestion = Ingestion::new(
        Arc::new(transport.clone()),
        store.clone(),
        metrics.clone(),
    );
    Harness {
        transport,
        store,
        metrics,
        ingestion,
    }
}

impl Harness {
    fn worker(&self, executor: impl Executor + 'static, config: WorkerConfig) -> Worker {
        Worker::new(
            1,
            WorkerContext {
                transport: Arc::new(self.transport.clone()),
                store: self.store.clone(),
                executor: Arc::new(executor),
                metrics: self.metrics.clone(),
            },
            config,
        )
    }

    /// Receive one delivery and run it through `worker`.
    async fn process_one(&self, worker: &Worker) {
        let mut consumer = self.transport.consume("test").await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer.next())
            .await
            .expect("a delivery should be ready")
            .unwrap();
        worker.process(delivery).await.unwrap();
    }

    async fn submit(&self, priority: Priority) -> Task {
        self.ingestion
            .submit(NewTask::new(priority).payload(json!({"n": 1})))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn successful_delivery_completes_and_acks() {
    let h = harness();
    let task = h.submit(Priority::High).await;
    let worker = h.worker(FixedExecutor::succeeding(), WorkerConfig::default());

    h.process_one(&worker).await;

    let stored = h.store.get(task.id).await.unwrap();
    assert_eq!(stored.status, Status::Completed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.payload, json!({"n": 1}));
    assert_eq!(
        h.store.history(task.id),
        vec![Status::Pending, Status::Running, Status::Completed]
    );
    assert_eq!(h.transport.acked(), 1);
    assert!(h.transport.is_drained());

    let counts = h.metrics.counts(Priority::High);
    assert_eq!(counts.processed, 1);
    assert_eq!(counts.observations, 1);
    assert_eq!(counts.failed(), 0);
}

#[tokio::test]
async fn retryable_failure_is_requeued_and_redelivered() {
    let h = harness();
    let task = h.submit(Priority::Medium).await;

    let failing = h.worker(FixedExecutor::failing(), WorkerConfig::default());
    h.process_one(&failing).await;

    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Failed);
    assert_eq!(h.transport.ready_len(), 1, "failed delivery goes back to the queue");
    assert_eq!(h.metrics.counts(Priority::Medium).retried, 1);

    let succeeding = h.worker(FixedExecutor::succeeding(), WorkerConfig::default());
    h.process_one(&succeeding).await;

    let stored = h.store.get(task.id).await.unwrap();
    assert_eq!(stored.status, Status::Completed);
    assert_eq!(stored.attempts, 2);
    assert_eq!(
        h.store.history(task.id),
        vec![
            Status::Pending,
            Status::Running,
            Status::Failed,
            Status::Running,
            Status::Completed
        ]
    );

    let counts = h.metrics.counts(Priority::Medium);
    assert_eq!(counts.processed, 1);
    assert_eq!(counts.terminal(), 1);
    assert!(h.transport.is_drained());
}

#[tokio::test]
async fn undecodable_delivery_is_rejected_without_status_write() {
    let h = harness();
    h.transport.publish_raw(Priority::High, b"{not a task".to_vec());
    let worker = h.worker(FixedExecutor::succeeding(), WorkerConfig::default());

    h.process_one(&worker).await;

    assert_eq!(h.store.write_count(), 0);
    assert_eq!(h.transport.dead_letters().len(), 1);
    assert_eq!(h.transport.ready_len(), 0, "poison message is never redelivered");
    assert_eq!(h.metrics.total().terminal(), 0);
}

#[tokio::test]
async fn worker_survives_undecodable_delivery() {
    let h = harness();
    h.transport.publish_raw(Priority::High, b"garbage".to_vec());
    let task = h.submit(Priority::Low).await;

    let worker = h.worker(FixedExecutor::succeeding(), WorkerConfig::default());
    let shutdown = CancellationToken::new();
    let run = {
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    wait_until(|| h.transport.is_drained()).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();

    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Completed);
    assert_eq!(h.transport.dead_letters().len(), 1);
}

#[tokio::test]
async fn store_outage_does_not_block_execution() {
    let h = harness();
    let task = h.submit(Priority::Low).await;
    h.store.reject_writes(true);

    let worker = h.worker(FixedExecutor::succeeding(), WorkerConfig::default());
    h.process_one(&worker).await;

    assert_eq!(h.transport.acked(), 1);
    assert_eq!(h.metrics.counts(Priority::Low).processed, 1);
    // Visibility is what degrades: the record still says pending.
    h.store.reject_writes(false);
    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Pending);
}

#[tokio::test]
async fn attempt_cap_turns_retryable_failure_terminal() {
    let h = harness();
    let task = h.submit(Priority::High).await;
    let worker = h.worker(
        FixedExecutor::failing(),
        WorkerConfig {
            max_attempts: Some(2),
        },
    );

    h.process_one(&worker).await;
    assert_eq!(h.transport.ready_len(), 1);

    h.process_one(&worker).await;
    assert_eq!(h.transport.ready_len(), 0);
    assert_eq!(h.transport.dead_letters().len(), 1);

    let stored = h.store.get(task.id).await.unwrap();
    assert_eq!(stored.status, Status::Failed);
    assert_eq!(stored.attempts, 2);

    let counts = h.metrics.counts(Priority::High);
    assert_eq!(counts.retried, 1);
    assert_eq!(counts.failed_terminal, 1);
    assert_eq!(counts.terminal(), 1);
}

#[tokio::test]
async fn permanent_failure_is_not_requeued() {
    let h = harness();
    let task = h.submit(Priority::Medium).await;
    let worker = h.worker(
        FixedExecutor::new(ExecutionOutcome::permanent("bad payload")),
        WorkerConfig::default(),
    );

    h.process_one(&worker).await;

    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Failed);
    assert!(h.transport.is_drained());
    assert_eq!(h.transport.dead_letters().len(), 1);
    assert_eq!(h.metrics.counts(Priority::Medium).failed_terminal, 1);
}

#[tokio::test]
async fn running_is_persisted_before_execution_finishes() {
    let h = harness();
    let task = h.submit(Priority::High).await;
    let worker = h.worker(
        FixedExecutor::succeeding().with_latency(Duration::from_millis(200)),
        WorkerConfig::default(),
    );

    let shutdown = CancellationToken::new();
    let run = {
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    let store = h.store.clone();
    let id = task.id;
    wait_until(move || store.history(id).contains(&Status::Running)).await;
    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Running);

    wait_until(|| h.transport.is_drained()).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();
    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Completed);
}

#[tokio::test]
async fn shutdown_finishes_in_flight_delivery() {
    let h = harness();
    let task = h.submit(Priority::High).await;
    let worker = h.worker(
        FixedExecutor::succeeding().with_latency(Duration::from_millis(100)),
        WorkerConfig::default(),
    );

    let shutdown = CancellationToken::new();
    let run = {
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    wait_until(|| h.transport.in_flight() == 1).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("worker should stop")
        .unwrap()
        .unwrap();

    assert_eq!(h.store.get(task.id).await.unwrap().status, Status::Completed);
    assert_eq!(h.transport.acked(), 1);
}

#[tokio::test]
async fn idle_worker_stops_on_shutdown() {
    let h = harness();
    let worker = h.worker(FixedExecutor::succeeding(), WorkerConfig::default());
    let shutdown = CancellationToken::new();
    let run = {
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("idle worker should stop promptly")
        .unwrap()
        .unwrap();
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
