//! Integration tests for telemetry initialization and span helpers.

use taskq::model::{Priority, Status, TaskId};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = taskq::telemetry::TelemetryConfig::new("taskq-test")
        .attribute("taskq.worker_count", 1_i64);
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = taskq::telemetry::init_telemetry(config);
}

#[test]
fn task_span_creates_and_records_transition() {
    let id = TaskId::new();
    let span = taskq::telemetry::task::start_task_span(1, &id, Priority::High, 1);
    taskq::telemetry::task::record_state_transition(&span, Status::Pending, Status::Running);
    taskq::telemetry::task::record_state_transition(&span, Status::Running, Status::Completed);
}
