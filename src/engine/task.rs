//! Retrying task loop - drives one worker until a stop condition
//!
//! Stop conditions:
//! - fatal error (anything the classifier does not mark transient)
//! - cancellation (checked before every attempt, wakes backoff sleeps)
//! - deadline reached (duration mode)
//! - iteration budget spent (iteration mode)
//!
//! Every attempt is timed and recorded before the retry decision is made.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::backoff::BackoffPolicy;
use super::classifier::{ErrorClass, classify, sql_state};
use super::metrics::CallContext;
use crate::units::format_duration;

/// Attempts per iteration before an iteration-bound task gives up
pub const MAX_ITERATION_ATTEMPTS: u32 = 10;

// ============================================================
// UNIT OF WORK
// ============================================================

/// One invocation of the caller's work. Must be safe to invoke repeatedly;
/// a transient failure leads to the same call being made again.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> UnitOfWork for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

/// How long a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Keep invoking the work until the duration has elapsed
    Duration(Duration),
    /// Complete exactly this many successful invocations
    Iterations(u64),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Duration(d) => write!(f, "duration={}", format_duration(*d)),
            Bound::Iterations(n) => write!(f, "iterations={}", n),
        }
    }
}

/// Why a task stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Completion {
    DeadlineReached,
    IterationsExhausted,
    Cancelled,
    FatalError(String),
    /// Iteration mode only: the per-iteration attempt cap was hit
    RetriesExhausted { iteration: u64, attempts: u32 },
}

impl Completion {
    /// Whether the task stopped because of a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Completion::FatalError(_) | Completion::RetriesExhausted { .. }
        )
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::DeadlineReached => write!(f, "deadline reached"),
            Completion::IterationsExhausted => write!(f, "iterations exhausted"),
            Completion::Cancelled => write!(f, "cancelled"),
            Completion::FatalError(msg) => write!(f, "fatal error: {}", msg),
            Completion::RetriesExhausted {
                iteration,
                attempts,
            } => write!(
                f,
                "retries exhausted at iteration {} after {} attempts",
                iteration, attempts
            ),
        }
    }
}

/// Final accounting for one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: String,
    pub completion: Completion,
    /// Successful invocations
    pub iterations: u64,
    /// All invocations, failed ones included
    pub attempts: u64,
    pub transient_errors: u64,
    pub elapsed: Duration,
}

// ============================================================
// CANCELLATION
// ============================================================

/// Cooperative cancellation flag shared by a pool and its loops.
///
/// Raising the flag also wakes every loop parked in a backoff sleep.
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Lower the flag so the owner can be reused
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel() is not missed
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a worker gauge up for the lifetime of a loop
struct GaugeGuard(Arc<AtomicUsize>);

impl GaugeGuard {
    fn enter(gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================
// LOOP
// ============================================================

/// Everything one worker needs to run a task to completion
pub struct RetryingTaskLoop {
    id: String,
    work: Arc<dyn UnitOfWork>,
    bound: Bound,
    backoff: BackoffPolicy,
    calls: CallContext,
    active_workers: Arc<AtomicUsize>,
    cancel: Arc<CancelSignal>,
}

enum Attempt {
    Ok,
    Retry,
    Stop(Completion),
}

impl RetryingTaskLoop {
    pub fn new(
        id: impl Into<String>,
        work: Arc<dyn UnitOfWork>,
        bound: Bound,
        calls: CallContext,
        active_workers: Arc<AtomicUsize>,
        cancel: Arc<CancelSignal>,
    ) -> Self {
        Self {
            id: id.into(),
            work,
            bound,
            backoff: BackoffPolicy::default(),
            calls,
            active_workers,
            cancel,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until a stop condition; never returns an error, failures are
    /// carried in the report's [`Completion`].
    pub async fn run(self) -> TaskReport {
        let _active = GaugeGuard::enter(self.active_workers.clone());
        let started = Instant::now();
        let mut report = TaskReport {
            id: self.id.clone(),
            completion: Completion::Cancelled,
            iterations: 0,
            attempts: 0,
            transient_errors: 0,
            elapsed: Duration::ZERO,
        };

        debug!(task = %self.id, bound = %self.bound, "Task started");
        report.completion = match self.bound {
            Bound::Duration(duration) => self.run_for(started + duration, &mut report).await,
            Bound::Iterations(n) => self.run_iterations(n, &mut report).await,
        };
        report.elapsed = started.elapsed();

        match &report.completion {
            Completion::FatalError(msg) => {
                error!(task = %self.id, iterations = report.iterations, error = %msg, "Task stopped on fatal error")
            }
            c @ Completion::RetriesExhausted { .. } => {
                error!(task = %self.id, iterations = report.iterations, "Task abandoned: {}", c)
            }
            c => debug!(
                task = %self.id,
                iterations = report.iterations,
                attempts = report.attempts,
                "Task finished: {}", c
            ),
        }
        report
    }

    async fn run_for(&self, deadline: Instant, report: &mut TaskReport) -> Completion {
        let mut consecutive: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Completion::Cancelled;
            }
            if Instant::now() >= deadline {
                return Completion::DeadlineReached;
            }

            match self.attempt(report).await {
                Attempt::Ok => consecutive = 0,
                Attempt::Retry => {
                    consecutive = consecutive.saturating_add(1);
                    self.back_off(consecutive).await;
                }
                Attempt::Stop(completion) => return completion,
            }
        }
    }

    async fn run_iterations(&self, iterations: u64, report: &mut TaskReport) -> Completion {
        for iteration in 0..iterations {
            let mut attempts: u32 = 0;
            loop {
                if self.cancel.is_cancelled() {
                    return Completion::Cancelled;
                }
                attempts += 1;

                match self.attempt(report).await {
                    Attempt::Ok => break,
                    Attempt::Retry if attempts >= MAX_ITERATION_ATTEMPTS => {
                        return Completion::RetriesExhausted {
                            iteration,
                            attempts,
                        };
                    }
                    Attempt::Retry => self.back_off(attempts).await,
                    Attempt::Stop(completion) => return completion,
                }
            }
        }
        Completion::IterationsExhausted
    }

    /// Invoke the work once and record the outcome
    async fn attempt(&self, report: &mut TaskReport) -> Attempt {
        let start = self.calls.before();
        let result = self.work.run().await;
        self.calls.after(start, result.as_ref().err());
        report.attempts += 1;

        match result {
            Ok(()) => {
                report.iterations += 1;
                Attempt::Ok
            }
            Err(e) => match classify(&e) {
                ErrorClass::Transient => {
                    report.transient_errors += 1;
                    warn!(
                        task = %self.id,
                        sql_state = sql_state(&e).as_deref().unwrap_or("-"),
                        "Transient error, retrying: {:#}", e
                    );
                    Attempt::Retry
                }
                ErrorClass::Fatal => Attempt::Stop(Completion::FatalError(format!("{:#}", e))),
            },
        }
    }

    /// Sleep for the backoff delay, or less if cancelled meanwhile
    async fn back_off(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        debug!(task = %self.id, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::metrics::CallMetrics;
    use crate::ledger::memory::SqlStateError;
    use std::sync::atomic::AtomicU32;

    fn transient() -> anyhow::Error {
        sqlx::Error::Database(Box::new(SqlStateError::new("40001", "restart transaction"))).into()
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_jitter: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    struct Fixture {
        metrics: CallMetrics,
        gauge: Arc<AtomicUsize>,
        cancel: Arc<CancelSignal>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                metrics: CallMetrics::default(),
                gauge: Arc::new(AtomicUsize::new(0)),
                cancel: Arc::new(CancelSignal::new()),
            }
        }

        fn task(&self, work: Arc<dyn UnitOfWork>, bound: Bound) -> RetryingTaskLoop {
            let gauge = self.gauge.clone();
            let calls = self
                .metrics
                .context_for("test", move || gauge.load(Ordering::SeqCst));
            RetryingTaskLoop::new(
                "test",
                work,
                bound,
                calls,
                self.gauge.clone(),
                self.cancel.clone(),
            )
            .with_backoff(fast_backoff())
        }
    }

    #[tokio::test]
    async fn test_iterations_run_exactly_n_times() {
        let fx = Fixture::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let work = Arc::new(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        let report = fx.task(work, Bound::Iterations(7)).run().await;
        assert_eq!(report.completion, Completion::IterationsExhausted);
        assert_eq!(report.iterations, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 7);
        assert_eq!(fx.metrics.row("test").unwrap().calls, 7);
        assert_eq!(fx.gauge.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_iteration_retries_stop_after_cap() {
        let fx = Fixture::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let work = Arc::new(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            }
        });

        let report = fx.task(work, Bound::Iterations(3)).run().await;
        assert_eq!(
            report.completion,
            Completion::RetriesExhausted {
                iteration: 0,
                attempts: MAX_ITERATION_ATTEMPTS
            }
        );
        assert_eq!(counter.load(Ordering::SeqCst), MAX_ITERATION_ATTEMPTS);
        assert_eq!(report.transient_errors, MAX_ITERATION_ATTEMPTS as u64);
        let row = fx.metrics.row("test").unwrap();
        assert_eq!(row.errors, MAX_ITERATION_ATTEMPTS as u64);
        assert_eq!(row.transient_errors, MAX_ITERATION_ATTEMPTS as u64);
    }

    #[tokio::test]
    async fn test_transient_then_success_counts_one_iteration() {
        let fx = Fixture::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let work = Arc::new(move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err::<(), _>(transient())
                } else {
                    Ok(())
                }
            }
        });

        let report = fx.task(work, Bound::Iterations(1)).run().await;
        assert_eq!(report.completion, Completion::IterationsExhausted);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.transient_errors, 2);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let fx = Fixture::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let work = Arc::new(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("constraint violated"))
            }
        });

        let report = fx
            .task(work, Bound::Duration(Duration::from_secs(30)))
            .run()
            .await;
        assert_eq!(
            report.completion,
            Completion::FatalError("constraint violated".into())
        );
        assert!(report.completion.is_failure());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(fx.gauge.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duration_mode_never_gives_up_on_transient() {
        let fx = Fixture::new();
        let work = Arc::new(|| async { Err::<(), _>(transient()) });

        let report = fx
            .task(work, Bound::Duration(Duration::from_millis(200)))
            .run()
            .await;
        assert_eq!(report.completion, Completion::DeadlineReached);
        assert!(report.attempts > MAX_ITERATION_ATTEMPTS as u64);
        assert_eq!(report.iterations, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let fx = Fixture::new();
        fx.cancel.cancel();
        let work = Arc::new(|| async { Ok::<(), anyhow::Error>(()) });

        let report = fx.task(work, Bound::Iterations(5)).run().await;
        assert_eq!(report.completion, Completion::Cancelled);
        assert_eq!(report.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_wakes_backoff_sleep() {
        let fx = Fixture::new();
        let work: Arc<dyn UnitOfWork> = Arc::new(|| async { Err::<(), _>(transient()) });
        let slow = BackoffPolicy {
            max_jitter: Duration::ZERO,
            max_delay: Duration::from_secs(60),
        };
        // Delays double toward a one minute cap
        let task = fx
            .task(work, Bound::Duration(Duration::from_secs(600)))
            .with_backoff(slow);

        let handle = tokio::spawn(task.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.gauge.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        fx.cancel.cancel();
        let report = handle.await.unwrap();
        assert_eq!(report.completion, Completion::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(fx.gauge.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_signal_reset() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
        signal.reset();
        assert!(!signal.is_cancelled());
    }
}
