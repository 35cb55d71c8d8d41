//! Pool sampler - periodic worker-pool stats in a bounded ring
//!
//! Oldest samples are overwritten once the ring is full.

use chrono::{DateTime, Utc};
use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::pool::{PoolStats, WorkerPool};
use super::task::CancelSignal;

/// One observation of the pool
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolSample {
    pub at: DateTime<Utc>,
    pub stats: PoolStats,
}

/// Min/max/avg over the retained samples
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub samples: usize,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
    pub min_active: usize,
    pub max_active: usize,
    pub avg_active: f64,
    pub min_running: usize,
    pub max_running: usize,
    pub avg_running: f64,
    pub submitted: u64,
    pub completed: u64,
}

impl fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool: samples={}, active min/avg/max={}/{:.1}/{}, running min/avg/max={}/{:.1}/{}, submitted={}, completed={}",
            self.samples,
            self.min_active,
            self.avg_active,
            self.max_active,
            self.min_running,
            self.avg_running,
            self.max_running,
            self.submitted,
            self.completed
        )
    }
}

pub struct PoolSampler {
    ring: ArrayQueue<PoolSample>,
}

impl PoolSampler {
    /// `capacity` of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Record one sample, evicting the oldest when full
    pub fn record(&self, stats: PoolStats) {
        self.ring.force_push(PoolSample {
            at: Utc::now(),
            stats,
        });
    }

    /// Remove and return all samples, oldest first
    pub fn drain(&self) -> Vec<PoolSample> {
        let mut out = Vec::with_capacity(self.ring.len());
        while let Some(sample) = self.ring.pop() {
            out.push(sample);
        }
        out
    }

    /// Summarize retained samples without consuming them.
    ///
    /// Assumes a single reader; concurrent `record` calls during the summary
    /// may evict samples being re-queued.
    pub fn summary(&self) -> Option<PoolSummary> {
        let samples = self.drain();
        let summary = summarize(&samples);
        for sample in samples {
            self.ring.force_push(sample);
        }
        summary
    }

    /// Sample `pool` every `interval` until `stop` is raised
    pub async fn run(self: Arc<Self>, pool: Arc<WorkerPool>, interval: Duration, stop: Arc<CancelSignal>) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = pool.stats();
                    debug!(active = stats.active, running = stats.running, "Pool sample");
                    self.record(stats);
                }
                _ = stop.cancelled() => break,
            }
        }
    }
}

fn summarize(samples: &[PoolSample]) -> Option<PoolSummary> {
    let first = samples.first()?;
    let last = samples.last()?;
    let n = samples.len();

    let active = samples.iter().map(|s| s.stats.active);
    let running = samples.iter().map(|s| s.stats.running);
    Some(PoolSummary {
        samples: n,
        first_at: first.at,
        last_at: last.at,
        min_active: active.clone().min().unwrap_or(0),
        max_active: active.clone().max().unwrap_or(0),
        avg_active: active.sum::<usize>() as f64 / n as f64,
        min_running: running.clone().min().unwrap_or(0),
        max_running: running.clone().max().unwrap_or(0),
        avg_running: running.sum::<usize>() as f64 / n as f64,
        submitted: last.stats.submitted,
        completed: last.stats.completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(active: usize, running: usize) -> PoolStats {
        PoolStats {
            pool_size: 8,
            active,
            running,
            submitted: active as u64,
            completed: 0,
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let sampler = PoolSampler::new(3);
        for i in 1..=5 {
            sampler.record(stats(i, i));
        }
        assert_eq!(sampler.len(), 3);
        let active: Vec<_> = sampler.drain().iter().map(|s| s.stats.active).collect();
        assert_eq!(active, vec![3, 4, 5]);
        assert!(sampler.is_empty());
    }

    #[test]
    fn test_summary_keeps_samples() {
        let sampler = PoolSampler::new(10);
        assert!(sampler.summary().is_none());

        sampler.record(stats(2, 1));
        sampler.record(stats(6, 4));
        sampler.record(stats(4, 4));

        let summary = sampler.summary().unwrap();
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.min_active, 2);
        assert_eq!(summary.max_active, 6);
        assert!((summary.avg_active - 4.0).abs() < f64::EPSILON);
        assert_eq!(summary.min_running, 1);
        assert_eq!(summary.max_running, 4);
        assert_eq!(summary.submitted, 4);
        assert_eq!(sampler.len(), 3);
    }

    #[tokio::test]
    async fn test_run_samples_until_stopped() {
        let pool = Arc::new(WorkerPool::new(2, Arc::new(crate::engine::CallMetrics::default())));
        let sampler = Arc::new(PoolSampler::new(100));
        let stop = Arc::new(CancelSignal::new());

        let handle = tokio::spawn(sampler.clone().run(pool, Duration::from_millis(5), stop.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        stop.cancel();
        handle.await.unwrap();

        assert!(sampler.len() >= 2);
        assert_eq!(sampler.summary().unwrap().max_active, 0);
    }
}
