//! Task processing span helpers.
//!
//! Provides span creation and status-transition recording for deliveries
//! flowing through a worker.

use tracing::Span;

use crate::model::{Priority, Status, TaskId};

/// Start a span for processing one delivery of a task.
///
/// The `task.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_task_span(worker: usize, task_id: &TaskId, priority: Priority, attempt: u32) -> Span {
    tracing::info_span!(
        "task.process",
        "worker" = worker,
        "task.id" = %task_id,
        "task.priority" = %priority,
        "task.attempt" = attempt,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
///
/// Emits a tracing `info` event scoped to the span and updates its
/// `task.status` field.
pub fn record_state_transition(span: &Span, from: Status, to: Status) {
    span.record("task.status", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
