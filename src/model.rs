//! Core data model.
//!
//! A task is a unit of work with identity, a priority class, an opaque
//! payload and a lifecycle status. The status is the only field that changes
//! after ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, assigned at ingestion.
    pub id: TaskId,

    /// Delivery priority class. Immutable.
    pub priority: Priority,

    /// Arbitrary payload for the executor. The core never interprets it.
    #[serde(default)]
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,

    /// Latest lifecycle status. The store keeps no history.
    pub status: Status,

    /// Delivery attempt that produced `status`. Zero while pending.
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    /// Copy of this task moved to `status` by delivery `attempt`.
    pub fn with_status(&self, status: Status, attempt: u32) -> Self {
        Self {
            status,
            attempts: attempt,
            ..self.clone()
        }
    }
}

/// Newtype for task IDs. The nil UUID is the "empty" id and is never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The empty id. Stores refuse to write it.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// First 8 chars of the UUID, for log lines and tables.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| Error::InvalidId(format!("{s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Delivery priority class. Higher classes are delivered first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// All classes, highest first (consumer read order).
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Numeric level: Low = 0, Medium = 1, High = 2.
    pub fn level(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Priority::Low),
            1 => Some(Priority::Medium),
            2 => Some(Priority::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "0" => Ok(Priority::Low),
            "medium" | "1" => Ok(Priority::Medium),
            "high" | "2" => Ok(Priority::High),
            _ => Err(Error::Other(format!("unknown priority: {s}"))),
        }
    }
}

// Accepts "high", "High" and the numeric level 2 alike.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Level(u8),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
            Repr::Level(level) => Priority::from_level(level)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown priority level: {level}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Recorded and published, waiting for a worker.
    Pending,
    /// A worker received a delivery and is executing it.
    Running,
    /// Done successfully. Terminal.
    Completed,
    /// The last delivery failed. Terminal for that delivery; a requeued
    /// task becomes `Running` again on redelivery.
    Failed,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Running) // redelivery after requeue
        )
    }

    /// Is this a terminal status for the delivery that wrote it?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "running" => Ok(Status::Running),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Request to create a task. Identity and timestamps are assigned by ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub priority: Priority,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NewTask {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            payload: serde_json::Value::Null,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Materialize as a fresh `Pending` task.
    pub fn into_task(self) -> Task {
        Task {
            id: TaskId::new(),
            priority: self.priority,
            payload: self.payload,
            created_at: Utc::now(),
            status: Status::Pending,
            attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_allows_only_forward_walk_and_redelivery() {
        use Status::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Running));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn priorities_order_low_to_high() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert_eq!(Priority::ALL[0], Priority::High);
        assert_eq!(Priority::ALL[2], Priority::Low);
    }

    #[test]
    fn priority_accepts_names_and_levels() {
        let p: Priority = serde_json::from_value(json!("high")).unwrap();
        assert_eq!(p, Priority::High);
        let p: Priority = serde_json::from_value(json!("Medium")).unwrap();
        assert_eq!(p, Priority::Medium);
        let p: Priority = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(p, Priority::Low);
        assert!(serde_json::from_value::<Priority>(json!(7)).is_err());
        assert!(serde_json::from_value::<Priority>(json!("urgent")).is_err());
        assert_eq!(serde_json::to_value(Priority::High).unwrap(), json!("high"));
    }

    #[test]
    fn new_task_starts_pending_with_fresh_id() {
        let a = NewTask::new(Priority::High).payload(json!({"n": 1})).into_task();
        let b = NewTask::new(Priority::High).into_task();
        assert_eq!(a.status, Status::Pending);
        assert_eq!(a.attempts, 0);
        assert_eq!(a.payload, json!({"n": 1}));
        assert!(!a.id.is_nil());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn task_json_round_trips_without_attempts_field() {
        let task = NewTask::new(Priority::Low).into_task();
        let mut value = serde_json::to_value(&task).unwrap();
        value.as_object_mut().unwrap().remove("attempts");
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.attempts, 0);
        assert_eq!(back.status, Status::Pending);
    }

    #[test]
    fn task_id_parses_and_rejects_garbage() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!(matches!("nope".parse::<TaskId>(), Err(Error::InvalidId(_))));
        assert_eq!(id.short().len(), 8);
    }
}
