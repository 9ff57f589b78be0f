//! Error types for taskq.

use thiserror::Error;

use crate::model::TaskId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid task id {0}")]
    InvalidId(String),

    /// A delivery body that does not decode into a task.
    #[error("malformed delivery: {0}")]
    Decode(#[from] serde_json::Error),

    /// Status store unreachable or write rejected.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The task was recorded but could not be handed to the transport.
    #[error("failed to schedule task {id}: {source}")]
    Scheduling {
        id: TaskId,
        #[source]
        source: Box<Error>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
