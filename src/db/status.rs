//! Task status records in Postgres.
//!
//! The `task_status` table is used strictly as a key-value store keyed by
//! task id: `get` is a primary-key lookup, `set` an upsert that replaces
//! every column.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskId};
use crate::store::StatusStore;

#[async_trait]
impl StatusStore for super::Db {
    async fn get(&self, id: TaskId) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT id, priority, payload, status, attempts, created_at
             FROM task_status WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("failed to read task {id}: {e}")))?;

        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }

    async fn set(&self, task: &Task) -> Result<()> {
        if task.id.is_nil() {
            return Err(Error::Storage("task id cannot be empty".to_string()));
        }

        sqlx::query(
            "INSERT INTO task_status (id, priority, payload, status, attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, now())
             ON CONFLICT (id) DO UPDATE SET
                priority = EXCLUDED.priority,
                payload = EXCLUDED.payload,
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(task.id.0)
        .bind(i16::from(task.priority.level()))
        .bind(&task.payload)
        .bind(task.status.to_string())
        .bind(i32::try_from(task.attempts).unwrap_or(i32::MAX))
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("failed to write task {}: {e}", task.id)))?;

        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    priority: i16,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        let priority = u8::try_from(self.priority)
            .ok()
            .and_then(Priority::from_level)
            .ok_or_else(|| Error::Storage(format!("bad priority {} for {}", self.priority, self.id)))?;

        Ok(Task {
            id: TaskId(self.id),
            priority,
            payload: self.payload,
            created_at: self.created_at,
            status: self
                .status
                .parse()
                .map_err(|_| Error::Storage(format!("bad status {:?} for {}", self.status, self.id)))?,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
        })
    }
}
