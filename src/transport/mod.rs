//! Delivery transport port.
//!
//! A durable priority queue with at-least-once delivery. Workers register as
//! independent consumers, each allowed exactly one unsettled delivery at a
//! time; that prefetch limit, not any lock in this crate, is what keeps a
//! delivery from being handled by two workers at once.
//!
//! Implementations:
//! - [`PgmqTransport`] (Postgres + pgmq, one queue per priority class)
//! - [`MemoryTransport`] (in-process, for tests)

pub mod memory;
pub mod pgmq;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Task;

pub use self::memory::MemoryTransport;
pub use self::pgmq::{PgmqConfig, PgmqTransport};

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Declare the durable queue(s). Idempotent.
    ///
    /// Fails with `Error::TransportUnavailable` if the transport cannot be
    /// reached.
    async fn setup(&self) -> Result<()>;

    /// Serialize `task` and enqueue it durably at its priority.
    ///
    /// Fails with `Error::Publish`; the caller must then assume nothing was
    /// enqueued.
    async fn publish(&self, task: &Task) -> Result<()>;

    /// Register a new consumer with a prefetch limit of one.
    async fn consume(&self, consumer: &str) -> Result<Box<dyn Consumer>>;
}

/// One consumer registration.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery. Does not return until one is available,
    /// the previous delivery from this consumer has been settled, or the
    /// transport fails. Cancel-safe: dropping the future loses nothing.
    async fn next(&mut self) -> Result<Delivery>;
}

/// Settles one delivery with the transport.
#[async_trait]
pub trait Acker: Send {
    async fn ack(&mut self) -> Result<()>;
    async fn nack(&mut self, requeue: bool) -> Result<()>;
}

/// One hand-off of a serialized task to a consumer.
///
/// Settling consumes the delivery, so it cannot be acknowledged twice.
pub struct Delivery {
    /// Serialized task as published.
    pub body: Vec<u8>,
    /// 1 for the first delivery of a message, incremented on each redelivery.
    pub attempt: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, attempt: u32, acker: Box<dyn Acker>) -> Self {
        Self {
            body,
            attempt,
            acker,
        }
    }

    /// Remove the message from the transport for good.
    pub async fn ack(mut self) -> Result<()> {
        self.acker.ack().await
    }

    /// Hand the message back. With `requeue` it will be redelivered
    /// eventually; without, it is dead-lettered and never redelivered.
    pub async fn nack(mut self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
