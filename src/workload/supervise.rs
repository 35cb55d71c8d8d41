//! Workload supervision
//!
//! Watches a running pool: logs the call metrics snapshot periodically,
//! samples pool stats, and cancels every worker when interrupted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::{CancelSignal, PoolSampler, PoolSummary, TaskReport, WorkerPool};

#[derive(Debug, Clone, Copy)]
pub struct SuperviseOptions {
    pub report_interval: Duration,
    pub sample_interval: Duration,
    pub sample_capacity: usize,
}

impl Default for SuperviseOptions {
    fn default() -> Self {
        Self {
            report_interval: Duration::from_secs(5),
            sample_interval: Duration::from_secs(1),
            sample_capacity: 720,
        }
    }
}

#[derive(Debug)]
pub struct SuperviseOutcome {
    pub reports: Vec<TaskReport>,
    pub interrupted: bool,
    pub pool: Option<PoolSummary>,
}

impl SuperviseOutcome {
    pub fn failures(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.completion.is_failure())
            .count()
    }
}

/// Run until every worker has finished or `interrupt` resolves, whichever
/// comes first. On interrupt all workers are cancelled and drained.
pub async fn supervise<F>(pool: Arc<WorkerPool>, options: SuperviseOptions, interrupt: F) -> SuperviseOutcome
where
    F: Future<Output = ()>,
{
    let sampler = Arc::new(PoolSampler::new(options.sample_capacity));
    let stop_sampler = Arc::new(CancelSignal::new());
    let sampling = tokio::spawn(sampler.clone().run(
        pool.clone(),
        options.sample_interval,
        stop_sampler.clone(),
    ));

    let mut ticker = tokio::time::interval(options.report_interval.max(Duration::from_millis(10)));
    // First tick completes immediately
    ticker.tick().await;
    tokio::pin!(interrupt);

    let mut interrupted = false;
    while pool.has_active_workers() {
        tokio::select! {
            _ = &mut interrupt => {
                warn!("Interrupted, cancelling workers");
                interrupted = true;
                break;
            }
            _ = ticker.tick() => {
                let snapshot = pool.metrics().snapshot();
                for row in &snapshot.rows {
                    info!("{}", row);
                }
                info!("{}", snapshot);
            }
        }
    }

    let reports = if interrupted {
        pool.cancel_all().await
    } else {
        pool.join_all().await
    };

    stop_sampler.cancel();
    if let Err(e) = sampling.await {
        warn!(error = %e, "Pool sampler panicked");
    }
    let summary = sampler.summary();

    info!("{}", pool.metrics().snapshot());
    if let Some(summary) = &summary {
        info!("{}", summary);
    }

    SuperviseOutcome {
        reports,
        interrupted,
        pool: summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Bound, CallMetrics, Completion};

    fn options() -> SuperviseOptions {
        SuperviseOptions {
            report_interval: Duration::from_millis(20),
            sample_interval: Duration::from_millis(5),
            sample_capacity: 100,
        }
    }

    #[tokio::test]
    async fn test_supervise_until_workers_finish() {
        let pool = Arc::new(WorkerPool::new(2, Arc::new(CallMetrics::default())));
        for _ in 0..2 {
            pool.submit(
                "op",
                || async { Ok::<(), anyhow::Error>(()) },
                Bound::Duration(Duration::from_millis(60)),
            );
        }

        let outcome = supervise(pool.clone(), options(), std::future::pending()).await;
        assert!(!outcome.interrupted);
        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.failures(), 0);
        assert!(
            outcome
                .reports
                .iter()
                .all(|r| r.completion == Completion::DeadlineReached)
        );
        assert!(outcome.pool.is_some());
    }

    #[tokio::test]
    async fn test_interrupt_cancels_workers() {
        let pool = Arc::new(WorkerPool::new(2, Arc::new(CallMetrics::default())));
        pool.submit(
            "op",
            || async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<(), anyhow::Error>(())
            },
            Bound::Duration(Duration::from_secs(600)),
        );

        let interrupt = tokio::time::sleep(Duration::from_millis(50));
        let outcome = supervise(pool.clone(), options(), interrupt).await;
        assert!(outcome.interrupted);
        assert_eq!(outcome.reports[0].completion, Completion::Cancelled);
        assert!(!pool.has_active_workers());
    }
}
