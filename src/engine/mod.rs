//! Worker engine: delivery consumption, lifecycle driving, pool management.

pub mod executor;
pub mod pool;
pub mod worker;

pub use executor::{ExecutionOutcome, Executor, ExecutorConfig, FixedExecutor, SimulatedExecutor};
pub use pool::WorkerPool;
pub use worker::{Worker, WorkerConfig, WorkerContext};
