//! Latency samples - bounded ring of recent call latencies
//!
//! Keeps the most recent `capacity` samples so percentile queries stay cheap
//! no matter how long a workload runs.

/// Latency samples in nanoseconds for percentile calculation
#[derive(Debug, Clone)]
pub struct LatencySamples {
    samples: Vec<u64>,
    capacity: usize,
    // Next slot to overwrite once the ring is full
    next: usize,
}

impl LatencySamples {
    /// Create a ring retaining at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        LatencySamples {
            samples: Vec::with_capacity(capacity.min(10_000)),
            capacity,
            next: 0,
        }
    }

    /// Record one latency sample
    #[inline]
    pub fn record(&mut self, latency_ns: u64) {
        if self.samples.len() < self.capacity {
            self.samples.push(latency_ns);
        } else {
            self.samples[self.next] = latency_ns;
            self.next = (self.next + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.next = 0;
    }

    /// Several percentiles (0-100) with a single sort
    pub fn percentiles(&self, ps: &[f64]) -> Vec<Option<u64>> {
        let sorted = self.sorted();
        ps.iter().map(|p| percentile_of_sorted(&sorted, *p)).collect()
    }

    fn sorted(&self) -> Vec<u64> {
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        sorted
    }
}

fn percentile_of_sorted(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 100.0);
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let mut samples = LatencySamples::new(1000);
        for i in 1..=100 {
            samples.record(i);
        }

        let ps = samples.percentiles(&[0.0, 50.0, 99.0, 100.0]);
        assert_eq!(ps[0], Some(1));
        // P50 of 1..100 with this formula rounds to 51 (50.5 rounded)
        let p50 = ps[1].unwrap();
        assert!(p50 == 50 || p50 == 51, "P50 should be ~50, got {}", p50);
        assert_eq!(ps[2], Some(99));
        assert_eq!(ps[3], Some(100));
    }

    #[test]
    fn test_ring_keeps_most_recent() {
        let mut samples = LatencySamples::new(3);
        for i in 1..=5 {
            samples.record(i * 10);
        }
        assert_eq!(samples.len(), 3);
        assert_eq!(
            samples.percentiles(&[0.0, 50.0, 100.0]),
            vec![Some(30), Some(40), Some(50)]
        );
    }

    #[test]
    fn test_empty_and_clear() {
        let mut samples = LatencySamples::new(0);
        assert!(samples.is_empty());
        assert_eq!(samples.percentiles(&[50.0]), vec![None]);

        samples.record(7);
        samples.record(9);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples.percentiles(&[100.0]), vec![Some(9)]);

        samples.clear();
        assert!(samples.is_empty());
    }
}
