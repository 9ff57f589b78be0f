//! pgmq-backed delivery transport.
//!
//! pgmq has no per-message priority, so each priority class gets its own
//! queue (`tasks_high`, `tasks_medium`, `tasks_low`) and consumers always read
//! the highest non-empty one first. Within a queue pgmq is FIFO.
//!
//! Settlement maps onto pgmq as follows:
//! - `ack` deletes the message;
//! - `nack(true)` resets its visibility timeout to zero, so it is
//!   redelivered on the next read;
//! - `nack(false)` archives it (kept in `pgmq.a_<queue>`, never redelivered).
//!
//! A read hides the message for the visibility timeout; that is the
//! per-delivery exclusivity, so the timeout must exceed the executor's
//! worst-case latency. An unsettled message reappears once it expires.
//!
//! Wake-ups come from a single `PgListener` per transport, started by the
//! first `consume` and fanned out to every consumer through a `Notify`.
//! Consumers never hold a pool connection while idle; they poll on
//! `poll_interval` when no notification arrives.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tokio::sync::{Notify, OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::Db;
use crate::db::pgmq::PgmqMessage;
use crate::error::{Error, Result};
use crate::model::{Priority, Task};
use crate::transport::{Acker, Consumer, Delivery, DeliveryTransport};

/// NOTIFY channel fired on every publish.
pub const READY_CHANNEL: &str = "tasks_ready";

/// Queue name for a priority class.
pub fn queue_name(priority: Priority) -> String {
    format!("tasks_{priority}")
}

/// Tuning for the pgmq transport.
#[derive(Debug, Clone)]
pub struct PgmqConfig {
    /// Seconds a read message stays invisible to other consumers.
    pub visibility_timeout_secs: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
}

impl Default for PgmqConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 30,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// NOTIFY fan-out shared by all consumers of one transport.
#[derive(Debug, Default)]
struct Wake {
    notify: Notify,
    listener: OnceCell<JoinHandle<()>>,
}

impl Drop for Wake {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgmqTransport {
    db: Arc<Db>,
    config: PgmqConfig,
    wake: Arc<Wake>,
}

impl PgmqTransport {
    pub fn new(db: Arc<Db>, config: PgmqConfig) -> Self {
        Self {
            db,
            config,
            wake: Arc::default(),
        }
    }

    /// Start the shared listener if it is not running yet.
    async fn ensure_listener(&self) -> Result<()> {
        self.wake
            .listener
            .get_or_try_init(|| async {
                let mut listener = PgListener::connect_with(self.db.pool())
                    .await
                    .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
                listener
                    .listen(READY_CHANNEL)
                    .await
                    .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
                info!(channel = READY_CHANNEL, "listening for published tasks");

                Ok::<_, Error>(tokio::spawn(forward_notifications(
                    listener,
                    Arc::downgrade(&self.wake),
                    self.config.poll_interval,
                )))
            })
            .await?;
        Ok(())
    }
}

/// Relay NOTIFYs to waiting consumers until the transport is gone.
async fn forward_notifications(mut listener: PgListener, wake: Weak<Wake>, retry: Duration) {
    loop {
        match listener.recv().await {
            Ok(notification) => {
                let Some(wake) = wake.upgrade() else {
                    return;
                };
                debug!(queue = notification.payload(), "notified of new task");
                wake.notify.notify_waiters();
            }
            Err(e) => {
                // sqlx reconnects on the next recv; consumers poll meanwhile.
                warn!("PgListener error: {e}, falling back to poll");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

#[async_trait]
impl DeliveryTransport for PgmqTransport {
    async fn setup(&self) -> Result<()> {
        for priority in Priority::ALL {
            self.db
                .create_queue(&queue_name(priority))
                .await
                .map_err(|e| Error::TransportUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn publish(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_value(task)
            .map_err(|e| Error::Publish(format!("failed to serialize task {}: {e}", task.id)))?;
        let queue = queue_name(task.priority);

        let msg_id = self
            .db
            .send_to_queue(&queue, &payload, READY_CHANNEL)
            .await
            .map_err(|e| Error::Publish(format!("failed to publish task {}: {e}", task.id)))?;

        debug!(task.id = %task.id, task.priority = %task.priority, msg_id, "published task");
        Ok(())
    }

    async fn consume(&self, consumer: &str) -> Result<Box<dyn Consumer>> {
        self.ensure_listener().await?;

        debug!(consumer, "consumer registered");
        Ok(Box::new(PgmqConsumer {
            db: Arc::clone(&self.db),
            config: self.config.clone(),
            wake: Arc::clone(&self.wake),
            prefetch: Arc::new(Semaphore::new(1)),
        }))
    }
}

struct PgmqConsumer {
    db: Arc<Db>,
    config: PgmqConfig,
    wake: Arc<Wake>,
    prefetch: Arc<Semaphore>,
}

impl PgmqConsumer {
    async fn read_highest(&self) -> Result<Option<(String, PgmqMessage)>> {
        for priority in Priority::ALL {
            let queue = queue_name(priority);
            if let Some(msg) = self
                .db
                .read_from_queue(&queue, self.config.visibility_timeout_secs)
                .await?
            {
                return Ok(Some((queue, msg)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Consumer for PgmqConsumer {
    async fn next(&mut self) -> Result<Delivery> {
        let permit = Arc::clone(&self.prefetch)
            .acquire_owned()
            .await
            .map_err(|_| Error::TransportUnavailable("consumer closed".to_string()))?;

        loop {
            // Armed before the read so a publish racing it still wakes us.
            let notified = self.wake.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some((queue, msg)) = self.read_highest().await? {
                let queued_ms = (chrono::Utc::now() - msg.enqueued_at).num_milliseconds();
                debug!(
                    queue = %queue,
                    msg_id = msg.msg_id,
                    read_ct = msg.read_ct,
                    queued_ms,
                    "delivery received"
                );

                let body = serde_json::to_vec(&msg.message)?;
                let attempt = u32::try_from(msg.read_ct).unwrap_or(1).max(1);
                return Ok(Delivery::new(
                    body,
                    attempt,
                    Box::new(PgmqAcker {
                        db: Arc::clone(&self.db),
                        queue,
                        msg_id: msg.msg_id,
                        _permit: permit,
                    }),
                ));
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

struct PgmqAcker {
    db: Arc<Db>,
    queue: String,
    msg_id: i64,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acker for PgmqAcker {
    async fn ack(&mut self) -> Result<()> {
        self.db.delete_message(&self.queue, self.msg_id).await
    }

    async fn nack(&mut self, requeue: bool) -> Result<()> {
        if requeue {
            self.db.set_visibility(&self.queue, self.msg_id, 0).await
        } else {
            self.db.archive_message(&self.queue, self.msg_id).await
        }
    }
}
