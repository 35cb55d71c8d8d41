//! Workload execution engine
//!
//! A bounded pool of workers that repeatedly execute a caller-supplied unit of
//! work, retry transient store conflicts with backoff, and record per-operation
//! call metrics.
//!
//! - [`backoff`] - retry delay policy
//! - [`classifier`] - transient vs. fatal errors
//! - [`metrics`] - per operation id counters and latency
//! - [`task`] - the retrying loop driving one worker
//! - [`pool`] - bounded pool with cooperative cancellation
//! - [`sampler`] - periodic pool stats ring

pub mod backoff;
pub mod classifier;
pub mod latency;
pub mod metrics;
pub mod pool;
pub mod sampler;
pub mod task;

pub use backoff::BackoffPolicy;
pub use classifier::{ErrorClass, SERIALIZATION_FAILURE, classify};
pub use metrics::{CallContext, CallMetrics, CallMetricsRow, CallMetricsSnapshot};
pub use pool::{PoolStats, TaskHandle, WorkerPool, default_pool_size};
pub use sampler::{PoolSampler, PoolSummary};
pub use task::{
    Bound, CancelSignal, Completion, MAX_ITERATION_ATTEMPTS, RetryingTaskLoop, TaskReport,
    UnitOfWork,
};
