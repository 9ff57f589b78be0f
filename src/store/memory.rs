//! In-process status store.
//!
//! Same contract as the Postgres store. Additionally records the sequence of
//! statuses written per id and can be told to reject writes, so tests can
//! observe lifecycle walks and storage outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{Status, Task, TaskId};
use crate::store::StatusStore;

#[derive(Debug, Default)]
struct Records {
    latest: HashMap<TaskId, Task>,
    history: HashMap<TaskId, Vec<Status>>,
}

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<Records>,
    reject_writes: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `set` fails with `Error::Storage`.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Every status written for `id`, in write order.
    pub fn history(&self, id: TaskId) -> Vec<Status> {
        self.lock().history.get(&id).cloned().unwrap_or_default()
    }

    /// Total number of successful writes.
    pub fn write_count(&self) -> usize {
        self.lock().history.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.lock().latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, id: TaskId) -> Result<Task> {
        self.lock()
            .latest
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn set(&self, task: &Task) -> Result<()> {
        if task.id.is_nil() {
            return Err(Error::Storage("task id cannot be empty".to_string()));
        }
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("write rejected for task {}", task.id)));
        }

        let mut records = self.lock();
        records.latest.insert(task.id, task.clone());
        records.history.entry(task.id).or_default().push(task.status);
        Ok(())
    }
}
