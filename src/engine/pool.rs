//! Worker pool - bounded concurrent execution of retrying tasks
//!
//! Each submission becomes one [`RetryingTaskLoop`] on its own tokio task.
//! A semaphore caps how many loops run at once; the rest wait for a permit.
//! Cancellation is cooperative and shared by every loop of the pool.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::metrics::CallMetrics;
use super::task::{Bound, CancelSignal, Completion, RetryingTaskLoop, TaskReport, UnitOfWork};

/// Pool size used when none is configured: `num_cpus * 4`
pub fn default_pool_size() -> usize {
    num_cpus::get() * 4
}

/// Caller's view of one submitted task
pub struct TaskHandle {
    id: String,
    report: watch::Receiver<Option<TaskReport>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.report.borrow().is_some()
    }

    /// Wait for the task's report. `None` if the task panicked.
    pub async fn wait(&mut self) -> Option<TaskReport> {
        self.report
            .wait_for(|r| r.is_some())
            .await
            .ok()
            .and_then(|r| r.clone())
    }
}

/// Lock-free pool counters
#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicUsize,
}

/// Bounded pool of retrying workers
pub struct WorkerPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    cancel: Arc<CancelSignal>,
    metrics: Arc<CallMetrics>,
    backoff: BackoffPolicy,
    gauges: DashMap<String, Arc<AtomicUsize>>,
    handles: Mutex<Vec<(String, JoinHandle<TaskReport>)>>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// `size` of 0 falls back to [`default_pool_size`]
    pub fn new(size: usize, metrics: Arc<CallMetrics>) -> Self {
        let size = if size == 0 { default_pool_size() } else { size };
        info!(pool_size = size, "Worker pool created");
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            cancel: Arc::new(CancelSignal::new()),
            metrics,
            backoff: BackoffPolicy::default(),
            gauges: DashMap::new(),
            handles: Mutex::new(Vec::new()),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn metrics(&self) -> &Arc<CallMetrics> {
        &self.metrics
    }

    /// Submit one task. Must be called from within a tokio runtime.
    pub fn submit<W>(&self, id: &str, work: W, bound: Bound) -> TaskHandle
    where
        W: UnitOfWork + 'static,
    {
        self.submit_shared(id, Arc::new(work), bound)
    }

    /// Submit one task sharing an already reference-counted unit of work.
    pub fn submit_shared(&self, id: &str, work: Arc<dyn UnitOfWork>, bound: Bound) -> TaskHandle {
        let gauge = self.gauge(id);
        let g = gauge.clone();
        let calls = self
            .metrics
            .context_for(id, move || g.load(Ordering::SeqCst));

        let task = RetryingTaskLoop::new(id, work, bound, calls, gauge, self.cancel.clone())
            .with_backoff(self.backoff);

        let (tx, rx) = watch::channel(None);
        let semaphore = self.semaphore.clone();
        let counters = self.counters.clone();
        counters.submitted.fetch_add(1, Ordering::SeqCst);
        counters.in_flight.fetch_add(1, Ordering::SeqCst);

        let join = tokio::spawn(async move {
            let _in_flight = InFlight(counters);
            // The semaphore is never closed; a missing permit only means unbounded
            let _permit = semaphore.acquire_owned().await.ok();
            let report = task.run().await;
            let _ = tx.send(Some(report.clone()));
            report
        });

        debug!(task = %id, bound = %bound, "Task submitted");
        self.lock_handles().push((id.to_string(), join));
        TaskHandle {
            id: id.to_string(),
            report: rx,
        }
    }

    /// Signal every worker to stop, wait for all of them, then lower the
    /// signal so the pool can be reused. No-op when nothing was submitted.
    ///
    /// Returns the reports of every drained task. Failures (fatal stops and
    /// panics) are logged per task.
    pub async fn cancel_all(&self) -> Vec<TaskReport> {
        let handles = std::mem::take(&mut *self.lock_handles());
        if handles.is_empty() {
            return Vec::new();
        }

        info!(tasks = handles.len(), "Cancelling workers");
        self.cancel.cancel();
        let reports = self.drain(handles).await;
        self.cancel.reset();
        info!(tasks = reports.len(), "Workers cancelled");
        reports
    }

    /// Wait for every submitted task to finish on its own.
    pub async fn join_all(&self) -> Vec<TaskReport> {
        let handles = std::mem::take(&mut *self.lock_handles());
        self.drain(handles).await
    }

    /// [`cancel_all`](Self::cancel_all) for callers tearing the pool down
    pub async fn shutdown(&self) -> Vec<TaskReport> {
        self.cancel_all().await
    }

    async fn drain(&self, handles: Vec<(String, JoinHandle<TaskReport>)>) -> Vec<TaskReport> {
        let mut reports = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(report) => {
                    match &report.completion {
                        Completion::Cancelled => {}
                        c if c.is_failure() => {
                            warn!(task = %id, iterations = report.iterations, "Task failed: {}", c)
                        }
                        c => debug!(task = %id, "Task completed: {}", c),
                    }
                    reports.push(report);
                }
                Err(e) if e.is_cancelled() => debug!(task = %id, "Task aborted"),
                Err(e) => {
                    self.counters.panicked.fetch_add(1, Ordering::SeqCst);
                    error!(task = %id, error = %e, "Task panicked");
                }
            }
        }
        reports
    }

    /// Tasks submitted and not yet finished (running or waiting for a permit)
    pub fn active_count(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_active_workers(&self) -> bool {
        self.active_count() > 0
    }

    pub fn submitted_count(&self) -> u64 {
        self.counters.submitted.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn panicked_count(&self) -> u64 {
        self.counters.panicked.load(Ordering::SeqCst)
    }

    /// Loops currently running for an operation id
    pub fn workers_for(&self, id: &str) -> usize {
        self.gauges
            .get(id)
            .map(|g| g.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Pool-wide view for samplers
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_size: self.size,
            active: self.active_count(),
            running: self
                .gauges
                .iter()
                .map(|g| g.value().load(Ordering::SeqCst))
                .sum(),
            submitted: self.submitted_count(),
            completed: self.completed_count(),
        }
    }

    fn gauge(&self, id: &str) -> Arc<AtomicUsize> {
        self.gauges
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<(String, JoinHandle<TaskReport>)>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Detached loops observe the flag and stop at their next check
        self.cancel.cancel();
    }
}

/// Point-in-time pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    /// Submitted and not finished
    pub active: usize,
    /// Holding a permit and executing
    pub running: usize,
    pub submitted: u64,
    pub completed: u64,
}

/// Marks a task finished however its future ends
struct InFlight(Arc<PoolCounters>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(size: usize) -> WorkerPool {
        WorkerPool::new(size, Arc::new(CallMetrics::default())).with_backoff(BackoffPolicy {
            max_jitter: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn test_cancel_all_without_workers_is_noop() {
        let pool = pool(2);
        assert!(pool.cancel_all().await.is_empty());
        assert!(!pool.has_active_workers());
        assert_eq!(pool.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_semaphore_bounds_running_loops() {
        let pool = pool(2);
        for _ in 0..5 {
            pool.submit(
                "sleepy",
                || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<(), anyhow::Error>(())
                },
                Bound::Duration(Duration::from_secs(10)),
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = pool.stats();
        assert_eq!(stats.active, 5);
        assert_eq!(stats.running, 2);
        assert_eq!(pool.workers_for("sleepy"), 2);

        let reports = pool.cancel_all().await;
        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|r| r.completion == Completion::Cancelled));
        assert_eq!(pool.workers_for("sleepy"), 0);
        assert_eq!(pool.completed_count(), 5);
        assert!(!pool.has_active_workers());
    }

    #[tokio::test]
    async fn test_pool_is_reusable_after_cancel() {
        let pool = pool(4);
        pool.submit(
            "a",
            || async { Ok::<(), anyhow::Error>(()) },
            Bound::Duration(Duration::from_secs(10)),
        );
        pool.cancel_all().await;
        // Second cancel is a no-op
        assert!(pool.cancel_all().await.is_empty());

        let mut handle = pool.submit(
            "a",
            || async { Ok::<(), anyhow::Error>(()) },
            Bound::Iterations(3),
        );
        let report = handle.wait().await.unwrap();
        assert_eq!(report.completion, Completion::IterationsExhausted);
        assert_eq!(report.iterations, 3);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_fatal_task_does_not_affect_siblings() {
        let pool = pool(4);
        let mut bad = pool.submit(
            "bad",
            || async { Err::<(), _>(anyhow::anyhow!("broken")) },
            Bound::Iterations(10),
        );
        let mut good = pool.submit(
            "good",
            || async { Ok::<(), anyhow::Error>(()) },
            Bound::Iterations(10),
        );

        assert!(bad.wait().await.unwrap().completion.is_failure());
        assert_eq!(
            good.wait().await.unwrap().completion,
            Completion::IterationsExhausted
        );

        let reports = pool.join_all().await;
        assert_eq!(reports.len(), 2);
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("unit of work panicked")
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let pool = pool(2);
        let mut handle = pool.submit(
            "panics",
            || explode(),
            Bound::Iterations(1),
        );

        assert!(handle.wait().await.is_none());
        assert!(pool.cancel_all().await.is_empty());
        assert_eq!(pool.panicked_count(), 1);
        assert_eq!(pool.workers_for("panics"), 0);
        assert!(!pool.has_active_workers());
    }
}
