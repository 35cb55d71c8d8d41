//! ledger-workload - contention stress harness for distributed SQL
//!
//! # Modules
//!
//! - [`engine`] - retrying task loop, worker pool, call metrics, pool sampler
//! - [`ledger`] - balanced multi-leg transfers over an [`AccountStore`]
//! - [`workload`] - init / transfer / balance / report generators
//! - [`units`] - duration and count expressions (`45m`, `10k`)
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - connection pool

pub mod config;
pub mod db;
pub mod engine;
pub mod ledger;
pub mod logging;
pub mod units;
pub mod workload;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError};
pub use engine::{
    BackoffPolicy, Bound, CallMetrics, CancelSignal, Completion, ErrorClass, PoolSampler,
    RetryingTaskLoop, TaskReport, UnitOfWork, WorkerPool,
};
pub use ledger::{
    Account, AccountStore, InMemoryAccountStore, LedgerError, LedgerTransferOperation, Money,
    PgAccountStore, TransferLeg, TransferRequest,
};
