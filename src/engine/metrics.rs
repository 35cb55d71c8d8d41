//! Call metrics - per operation id throughput, errors and latency
//!
//! Written concurrently by every worker executing an operation, read by
//! reporters through [`CallMetrics::snapshot`]. Counters are atomics; latency
//! samples sit behind a short-lived mutex. Recording never fails.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::classifier::{ErrorClass, classify};
use super::latency::LatencySamples;

/// Supplies the current number of workers executing an operation id
pub type ActiveWorkers = Arc<dyn Fn() -> usize + Send + Sync>;

/// Registry of per-operation metric windows
pub struct CallMetrics {
    windows: DashMap<String, Arc<CallWindow>>,
    sample_capacity: usize,
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CallMetrics {
    /// `sample_capacity` bounds the latency samples kept per operation id
    pub fn new(sample_capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            sample_capacity,
        }
    }

    /// Get (or create) the recording context for an operation id.
    ///
    /// The supplier passed by the first caller for an id is kept; later callers
    /// for the same id share the window and its supplier.
    pub fn context_for<F>(&self, operation_id: &str, active_workers: F) -> CallContext
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        let window = self
            .windows
            .entry(operation_id.to_string())
            .or_insert_with(|| {
                Arc::new(CallWindow::new(
                    Arc::new(active_workers),
                    self.sample_capacity,
                ))
            })
            .clone();
        CallContext { window }
    }

    /// Reset every counter and sample, keeping registered ids.
    pub fn clear(&self) {
        for entry in self.windows.iter() {
            entry.value().reset();
        }
    }

    /// Number of registered operation ids
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Point-in-time view of all windows, rows sorted by id
    pub fn snapshot(&self) -> CallMetricsSnapshot {
        let mut rows: Vec<CallMetricsRow> = self
            .windows
            .iter()
            .map(|entry| entry.value().row(entry.key()))
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));

        let total = CallMetricsTotal::from_rows(&rows);
        CallMetricsSnapshot { rows, total }
    }

    /// Snapshot of a single id
    pub fn row(&self, operation_id: &str) -> Option<CallMetricsRow> {
        self.windows
            .get(operation_id)
            .map(|w| w.value().row(operation_id))
    }
}

// ============================================================
// WINDOW
// ============================================================

/// Mutable aggregate for one operation id
pub struct CallWindow {
    active_workers: ActiveWorkers,
    calls: AtomicU64,
    errors: AtomicU64,
    transient_errors: AtomicU64,
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
    started_at: Mutex<Instant>,
    samples: Mutex<LatencySamples>,
}

impl CallWindow {
    fn new(active_workers: ActiveWorkers, sample_capacity: usize) -> Self {
        Self {
            active_workers,
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            total_latency_ns: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(u64::MAX),
            max_latency_ns: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
            samples: Mutex::new(LatencySamples::new(sample_capacity)),
        }
    }

    fn record(&self, latency: Duration, error: Option<ErrorClass>) {
        let ns = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);

        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_latency_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(ns, Ordering::Relaxed);

        match error {
            Some(ErrorClass::Transient) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.transient_errors.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorClass::Fatal) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }

        // A poisoned lock only means another recorder panicked mid-push; keep going.
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.record(ns);
    }

    fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.transient_errors.store(0, Ordering::Relaxed);
        self.total_latency_ns.store(0, Ordering::Relaxed);
        self.min_latency_ns.store(u64::MAX, Ordering::Relaxed);
        self.max_latency_ns.store(0, Ordering::Relaxed);
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn row(&self, id: &str) -> CallMetricsRow {
        let calls = self.calls.load(Ordering::Relaxed);
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        let min_ns = self.min_latency_ns.load(Ordering::Relaxed);
        let elapsed = self
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();

        let pct = {
            let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
            samples.percentiles(&[50.0, 90.0, 99.0, 99.9])
        };
        let ms = |ns: Option<u64>| ns.map(|v| v as f64 / 1_000_000.0).unwrap_or(0.0);

        let elapsed_secs = elapsed.as_secs_f64();
        CallMetricsRow {
            id: id.to_string(),
            active_workers: (self.active_workers)(),
            calls,
            errors: self.errors.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            elapsed_secs,
            ops_per_sec: if elapsed_secs > 0.0 {
                calls as f64 / elapsed_secs
            } else {
                0.0
            },
            mean_ms: if calls > 0 {
                total_ns as f64 / calls as f64 / 1_000_000.0
            } else {
                0.0
            },
            p50_ms: ms(pct[0]),
            p90_ms: ms(pct[1]),
            p99_ms: ms(pct[2]),
            p999_ms: ms(pct[3]),
            min_ms: if calls > 0 { ms(Some(min_ns)) } else { 0.0 },
            max_ms: ms(Some(self.max_latency_ns.load(Ordering::Relaxed))),
        }
    }
}

// ============================================================
// RECORDING CONTEXT
// ============================================================

/// Handle a worker uses to time and record calls for one operation id
#[derive(Clone)]
pub struct CallContext {
    window: Arc<CallWindow>,
}

impl CallContext {
    /// Mark the start of a call
    #[inline]
    pub fn before(&self) -> Instant {
        Instant::now()
    }

    /// Record the call started at `start`, with its error if it failed
    pub fn after(&self, start: Instant, error: Option<&anyhow::Error>) {
        self.window.record(start.elapsed(), error.map(classify));
    }

    /// Record an already measured call
    pub fn record(&self, latency: Duration, error: Option<ErrorClass>) {
        self.window.record(latency, error);
    }
}

// ============================================================
// SNAPSHOT
// ============================================================

/// One operation id's view at snapshot time
#[derive(Debug, Clone, Serialize)]
pub struct CallMetricsRow {
    pub id: String,
    pub active_workers: usize,
    pub calls: u64,
    pub errors: u64,
    pub transient_errors: u64,
    pub elapsed_secs: f64,
    pub ops_per_sec: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl CallMetricsRow {
    /// Share of failed calls, 0.0 - 100.0
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64 * 100.0
        }
    }
}

impl fmt::Display for CallMetricsRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: workers={} calls={} errors={} (transient={}, {:.2}%) ops/s={:.1} mean={:.2}ms p50={:.2}ms p90={:.2}ms p99={:.2}ms p999={:.2}ms max={:.2}ms",
            self.id,
            self.active_workers,
            self.calls,
            self.errors,
            self.transient_errors,
            self.error_rate(),
            self.ops_per_sec,
            self.mean_ms,
            self.p50_ms,
            self.p90_ms,
            self.p99_ms,
            self.p999_ms,
            self.max_ms
        )
    }
}

/// Aggregate footer across all ids
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallMetricsTotal {
    pub active_workers: usize,
    pub calls: u64,
    pub errors: u64,
    pub transient_errors: u64,
    pub ops_per_sec: f64,
    /// Call-weighted mean latency
    pub mean_ms: f64,
}

impl CallMetricsTotal {
    fn from_rows(rows: &[CallMetricsRow]) -> Self {
        let calls: u64 = rows.iter().map(|r| r.calls).sum();
        let weighted: f64 = rows.iter().map(|r| r.mean_ms * r.calls as f64).sum();
        Self {
            active_workers: rows.iter().map(|r| r.active_workers).sum(),
            calls,
            errors: rows.iter().map(|r| r.errors).sum(),
            transient_errors: rows.iter().map(|r| r.transient_errors).sum(),
            ops_per_sec: rows.iter().map(|r| r.ops_per_sec).sum(),
            mean_ms: if calls > 0 {
                weighted / calls as f64
            } else {
                0.0
            },
        }
    }
}

/// Immutable snapshot of all call metrics (for reporting)
#[derive(Debug, Clone, Serialize)]
pub struct CallMetricsSnapshot {
    pub rows: Vec<CallMetricsRow>,
    pub total: CallMetricsTotal,
}

impl fmt::Display for CallMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Call Metrics: ids={}, workers={}, calls={}, errors={} (transient={}), ops/s={:.1}, mean={:.2}ms",
            self.rows.len(),
            self.total.active_workers,
            self.total.calls,
            self.total.errors,
            self.total.transient_errors,
            self.total.ops_per_sec,
            self.total.mean_ms
        )
    }
}
