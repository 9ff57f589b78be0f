//! Status store port.
//!
//! A durable key-value view of the latest status of every task. Single-key
//! get/set only: no transactions, no history. Concurrent writers to the same
//! id resolve by last-writer-wins.
//!
//! Implementations:
//! - [`crate::db::Db`] (Postgres `task_status` table)
//! - [`MemoryStatusStore`] (in-process, for tests)

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Task, TaskId};

pub use self::memory::MemoryStatusStore;

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch the latest record for `id`.
    ///
    /// Fails with `Error::NotFound` if no record exists.
    async fn get(&self, id: TaskId) -> Result<Task>;

    /// Overwrite the record for `task.id` with `task`.
    ///
    /// Fails with `Error::Storage` (and writes nothing) if the id is empty
    /// or the store rejects the write.
    async fn set(&self, task: &Task) -> Result<()>;
}
