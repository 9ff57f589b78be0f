//! In-process delivery transport.
//!
//! Mirrors the broker contract closely enough for the worker loop to be
//! exercised without Postgres:
//! - three FIFO lanes, always drained highest priority first;
//! - requeued messages go to the tail of their lane with `attempt + 1`;
//! - rejected messages land in a dead-letter list and are never redelivered;
//! - a delivery dropped without being settled is requeued, as a broker does
//!   when a consumer's channel closes;
//! - each consumer holds at most one unsettled delivery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::model::{Priority, Task};
use crate::transport::{Acker, Consumer, Delivery, DeliveryTransport};

#[derive(Debug)]
struct Envelope {
    priority: Priority,
    body: Vec<u8>,
    attempt: u32,
}

#[derive(Debug, Default)]
struct Lanes {
    /// Indexed by `Priority::level()`.
    ready: [VecDeque<Envelope>; 3],
    dead: Vec<Vec<u8>>,
    in_flight: usize,
    acked: u64,
    published: u64,
}

impl Lanes {
    fn push(&mut self, envelope: Envelope) {
        self.ready[usize::from(envelope.priority.level())].push_back(envelope);
    }

    fn pop_highest(&mut self) -> Option<Envelope> {
        let envelope = Priority::ALL
            .iter()
            .find_map(|p| self.ready[usize::from(p.level())].pop_front())?;
        self.in_flight += 1;
        Some(envelope)
    }
}

#[derive(Debug, Default)]
struct Shared {
    lanes: Mutex<Lanes>,
    notify: Notify,
    unavailable: AtomicBool,
    fail_publishes: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, envelope: Envelope) {
        self.lock().push(envelope);
        self.notify.notify_waiters();
    }

    fn settle(&self, mut envelope: Envelope, disposition: Disposition) {
        let mut lanes = self.lock();
        lanes.in_flight = lanes.in_flight.saturating_sub(1);
        match disposition {
            Disposition::Ack => lanes.acked += 1,
            Disposition::Requeue => {
                envelope.attempt += 1;
                lanes.push(envelope);
                drop(lanes);
                self.notify.notify_waiters();
            }
            Disposition::Reject => lanes.dead.push(envelope.body),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Ack,
    Requeue,
    Reject,
}

/// In-process priority transport. Cloning shares the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an arbitrary body, bypassing serialization.
    pub fn publish_raw(&self, priority: Priority, body: impl Into<Vec<u8>>) {
        self.shared.enqueue(Envelope {
            priority,
            body: body.into(),
            attempt: 1,
        });
    }

    /// While set, `setup` and every consumer's `next` fail with
    /// `Error::TransportUnavailable`. Idle consumers are woken to see it.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// While set, `publish` fails with `Error::Publish`.
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Messages waiting for a consumer.
    pub fn ready_len(&self) -> usize {
        self.shared.lock().ready.iter().map(VecDeque::len).sum()
    }

    /// Deliveries handed out and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    pub fn acked(&self) -> u64 {
        self.shared.lock().acked
    }

    /// Successful `publish` calls.
    pub fn published(&self) -> u64 {
        self.shared.lock().published
    }

    /// Bodies rejected without requeue.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.shared.lock().dead.clone()
    }

    /// Nothing ready and nothing in flight.
    pub fn is_drained(&self) -> bool {
        let lanes = self.shared.lock();
        lanes.in_flight == 0 && lanes.ready.iter().all(VecDeque::is_empty)
    }
}

#[async_trait]
impl DeliveryTransport for MemoryTransport {
    async fn setup(&self) -> Result<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable(
                "in-memory transport marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(&self, task: &Task) -> Result<()> {
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            return Err(Error::Publish(format!("publish refused for task {}", task.id)));
        }
        let body = serde_json::to_vec(task)
            .map_err(|e| Error::Publish(format!("failed to serialize task {}: {e}", task.id)))?;

        self.shared.lock().published += 1;
        self.shared.enqueue(Envelope {
            priority: task.priority,
            body,
            attempt: 1,
        });
        Ok(())
    }

    async fn consume(&self, _consumer: &str) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            prefetch: Arc::new(Semaphore::new(1)),
        }))
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    prefetch: Arc<Semaphore>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Delivery> {
        let permit = Arc::clone(&self.prefetch)
            .acquire_owned()
            .await
            .map_err(|_| Error::TransportUnavailable("consumer closed".to_string()))?;

        loop {
            // Register interest before checking, so a publish between the
            // check and the await still wakes us.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.unavailable.load(Ordering::SeqCst) {
                return Err(Error::TransportUnavailable(
                    "in-memory transport marked unavailable".to_string(),
                ));
            }

            let popped = self.shared.lock().pop_highest();
            if let Some(envelope) = popped {
                return Ok(Delivery::new(
                    envelope.body.clone(),
                    envelope.attempt,
                    Box::new(MemoryAcker {
                        shared: Arc::clone(&self.shared),
                        envelope: Some(envelope),
                        _permit: permit,
                    }),
                ));
            }

            notified.await;
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    envelope: Option<Envelope>,
    _permit: OwnedSemaphorePermit,
}

impl MemoryAcker {
    fn settle(&mut self, disposition: Disposition) -> Result<()> {
        let envelope = self
            .envelope
            .take()
            .ok_or_else(|| Error::Other("delivery already settled".to_string()))?;
        self.shared.settle(envelope, disposition);
        Ok(())
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<()> {
        self.settle(Disposition::Ack)
    }

    async fn nack(&mut self, requeue: bool) -> Result<()> {
        self.settle(if requeue {
            Disposition::Requeue
        } else {
            Disposition::Reject
        })
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            self.shared.settle(envelope, Disposition::Requeue);
        }
    }
}
