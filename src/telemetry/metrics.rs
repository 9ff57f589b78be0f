//! Task metrics.
//!
//! Components never touch a global registry directly: they receive an
//! `Arc<dyn MetricsSink>` at construction. [`OtelMetrics`] records through
//! the globally-registered OTel `MeterProvider`; [`RecordingMetrics`] keeps
//! counts in memory for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::model::Priority;

/// Sink for the task counters and the processing-duration histogram.
pub trait MetricsSink: Send + Sync {
    /// A task was accepted by ingestion.
    fn task_submitted(&self, priority: Priority);

    /// A delivery completed successfully after `duration` of processing.
    fn task_processed(&self, priority: Priority, duration: Duration);

    /// A delivery failed. `will_retry` is true when the delivery was requeued.
    fn task_failed(&self, priority: Priority, will_retry: bool);
}

/// Returns the shared meter for taskq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: tasks submitted. Labels: `priority`.
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("tasks_submitted_total")
        .with_description("Total number of tasks submitted")
        .build()
}

/// Counter: tasks processed successfully. Labels: `priority`.
pub fn tasks_processed() -> Counter<u64> {
    meter()
        .u64_counter("tasks_processed_total")
        .with_description("Total number of tasks processed successfully")
        .build()
}

/// Counter: failed deliveries. Labels: `priority`, `retry` ("true" | "false").
pub fn tasks_failed() -> Counter<u64> {
    meter()
        .u64_counter("tasks_failed_total")
        .with_description("Total number of task deliveries that failed processing")
        .build()
}

/// Histogram: processing duration of successful deliveries in seconds.
/// Labels: `priority`.
pub fn task_processing_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("task_processing_duration_seconds")
        .with_description("Histogram of task processing times")
        .with_unit("s")
        .with_boundaries(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0])
        .build()
}

/// OTel-backed sink. Instruments are created once.
#[derive(Clone)]
pub struct OtelMetrics {
    submitted: Counter<u64>,
    processed: Counter<u64>,
    failed: Counter<u64>,
    duration: Histogram<f64>,
}

impl OtelMetrics {
    pub fn new() -> Self {
        Self {
            submitted: tasks_submitted(),
            processed: tasks_processed(),
            failed: tasks_failed(),
            duration: task_processing_duration(),
        }
    }
}

impl Default for OtelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for OtelMetrics {
    fn task_submitted(&self, priority: Priority) {
        self.submitted
            .add(1, &[KeyValue::new("priority", priority.as_str())]);
    }

    fn task_processed(&self, priority: Priority, duration: Duration) {
        let attrs = [KeyValue::new("priority", priority.as_str())];
        self.duration.record(duration.as_secs_f64(), &attrs);
        self.processed.add(1, &attrs);
    }

    fn task_failed(&self, priority: Priority, will_retry: bool) {
        self.failed.add(
            1,
            &[
                KeyValue::new("priority", priority.as_str()),
                KeyValue::new("retry", if will_retry { "true" } else { "false" }),
            ],
        );
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn task_submitted(&self, _priority: Priority) {}
    fn task_processed(&self, _priority: Priority, _duration: Duration) {}
    fn task_failed(&self, _priority: Priority, _will_retry: bool) {}
}

/// Per-priority counts captured by [`RecordingMetrics`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Counts {
    pub submitted: u64,
    pub processed: u64,
    /// Failed deliveries that were requeued.
    pub retried: u64,
    /// Failed deliveries that were not requeued.
    pub failed_terminal: u64,
    /// Number of duration observations.
    pub observations: u64,
}

impl Counts {
    /// Every failed delivery, retried or not.
    pub fn failed(&self) -> u64 {
        self.retried + self.failed_terminal
    }

    /// Deliveries that ended the task's life: processed or failed for good.
    pub fn terminal(&self) -> u64 {
        self.processed + self.failed_terminal
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counts: Mutex<HashMap<Priority, Counts>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self, priority: Priority) -> Counts {
        self.lock().get(&priority).cloned().unwrap_or_default()
    }

    /// Sum of counts over all priorities.
    pub fn total(&self) -> Counts {
        self.lock().values().fold(Counts::default(), |mut acc, c| {
            acc.submitted += c.submitted;
            acc.processed += c.processed;
            acc.retried += c.retried;
            acc.failed_terminal += c.failed_terminal;
            acc.observations += c.observations;
            acc
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Priority, Counts>> {
        self.counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn update(&self, priority: Priority, f: impl FnOnce(&mut Counts)) {
        f(self.lock().entry(priority).or_default());
    }
}

impl MetricsSink for RecordingMetrics {
    fn task_submitted(&self, priority: Priority) {
        self.update(priority, |c| c.submitted += 1);
    }

    fn task_processed(&self, priority: Priority, _duration: Duration) {
        self.update(priority, |c| {
            c.processed += 1;
            c.observations += 1;
        });
    }

    fn task_failed(&self, priority: Priority, will_retry: bool) {
        self.update(priority, |c| {
            if will_retry {
                c.retried += 1;
            } else {
                c.failed_terminal += 1;
            }
        });
    }
}
