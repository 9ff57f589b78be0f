//! Task execution capability.
//!
//! The worker never knows what a task does; it hands the task to an
//! [`Executor`] and acts on the [`ExecutionOutcome`].

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::model::Task;

/// Result of executing one delivery of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// The work failed. `retryable` failures are requeued (subject to the
    /// retry cap); the others fail the task for good.
    Failed { reason: String, retryable: bool },
}

impl ExecutionOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task) -> ExecutionOutcome;
}

/// Parameters of the simulated workload.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Latency is drawn uniformly from `min_latency..max_latency`.
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability that an attempt fails, independent per attempt.
    pub failure_rate: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(500),
            max_latency: Duration::from_millis(1500),
            failure_rate: 0.1,
        }
    }
}

/// Stand-in workload: sleeps for a random latency, then fails with a fixed
/// probability. Failures are always retryable.
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutor {
    config: ExecutorConfig,
}

impl SimulatedExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn draw(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let min = self.config.min_latency.as_millis() as u64;
        let max = self.config.max_latency.as_millis() as u64;
        let latency = if max > min { rng.gen_range(min..max) } else { min };
        let fail = rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0));
        (Duration::from_millis(latency), fail)
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn execute(&self, _task: &Task) -> ExecutionOutcome {
        let (latency, fail) = self.draw();
        tokio::time::sleep(latency).await;
        if fail {
            ExecutionOutcome::retryable("simulated failure")
        } else {
            ExecutionOutcome::Succeeded
        }
    }
}

/// Always returns the same outcome, after an optional fixed latency.
#[derive(Debug, Clone)]
pub struct FixedExecutor {
    outcome: ExecutionOutcome,
    latency: Duration,
}

impl FixedExecutor {
    pub fn new(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            latency: Duration::ZERO,
        }
    }

    pub fn succeeding() -> Self {
        Self::new(ExecutionOutcome::Succeeded)
    }

    pub fn failing() -> Self {
        Self::new(ExecutionOutcome::retryable("fixed failure"))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl Executor for FixedExecutor {
    async fn execute(&self, _task: &Task) -> ExecutionOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.outcome.clone()
    }
}
