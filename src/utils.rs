/// Returns the monotonic clock in nanoseconds.
#[cfg(unix)]
#[inline(never)]
pub fn mono_time_ns() -> u64 {
    use libc::{CLOCK_MONOTONIC, clock_gettime, timespec};
    unsafe {
        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        clock_gettime(CLOCK_MONOTONIC, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
}

/// Latency sample recorder for the demo harness.
///
/// Collects nanosecond samples and reports tail percentiles. Not part of
/// the fan-out fast path.
pub struct LatencyStats {
    samples: Vec<u64>,
}

impl LatencyStats {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, nanos: u64) {
        self.samples.push(nanos);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The `p`-th percentile, `0.0 ..= 1.0`. Sorts on demand.
    pub fn percentile(&mut self, p: f64) -> u64 {
        assert!(!self.samples.is_empty());
        assert!((0.0..=1.0).contains(&p));
        self.samples.sort_unstable();
        let idx = ((self.samples.len() - 1) as f64 * p).round() as usize;
        self.samples[idx]
    }

    /// One-line summary: `label n=.. min=.. p50=.. p99=.. p99.9=.. max=..`.
    pub fn report(&mut self, label: &str) -> String {
        format!(
            "{} n={} min={} p50={} p90={} p99={} p99.9={} max={}",
            label,
            self.len(),
            self.percentile(0.0),
            self.percentile(0.5),
            self.percentile(0.9),
            self.percentile(0.99),
            self.percentile(0.999),
            self.percentile(1.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn mono_time_ns_is_monotonic_non_decreasing() {
        let t1 = mono_time_ns();
        let t2 = mono_time_ns();
        assert!(t2 >= t1);
    }

    #[cfg(unix)]
    #[test]
    fn mono_time_ns_increases_over_sleep() {
        let t1 = mono_time_ns();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t2 = mono_time_ns();
        assert!(t2 > t1);
    }

    #[test]
    fn percentiles_over_known_samples() {
        let mut stats = LatencyStats::with_capacity(5);
        for v in [5, 1, 9, 3, 7] {
            stats.record(v);
        }
        assert_eq!(stats.len(), 5);
        assert!(!stats.is_empty());
        assert_eq!(stats.percentile(0.0), 1);
        assert_eq!(stats.percentile(0.5), 5);
        assert_eq!(stats.percentile(1.0), 9);
    }

    #[test]
    #[should_panic]
    fn percentile_panics_on_empty() {
        let mut stats = LatencyStats::with_capacity(0);
        let _ = stats.percentile(0.5);
    }

    #[test]
    fn report_mentions_label_and_count() {
        let mut stats = LatencyStats::with_capacity(3);
        stats.record(10);
        stats.record(20);
        stats.record(30);
        let line = stats.report("fanout");
        assert!(line.starts_with("fanout n=3"));
    }
}
