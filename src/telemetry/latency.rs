use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

pub const CYCLE: &str = "cycle";
pub const CONTRACT_FANOUT: &str = "contract_fanout";
pub const PRICE_FANOUT: &str = "price_fanout";
pub const POOL_READS: &str = "pool_reads";
pub const SUBMIT: &str = "submit";

/// p50/p95/p99 over the retained samples of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub samples: usize,
}

/// Rolling latency samples per controller stage.
pub struct LatencyTracker {
    samples: DashMap<&'static str, VecDeque<Duration>>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: DashMap::new(),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&self, operation: &'static str, elapsed: Duration) {
        let mut window = self
            .samples
            .entry(operation)
            .or_insert_with(|| VecDeque::with_capacity(self.max_samples));
        if window.len() >= self.max_samples {
            window.pop_front();
        }
        window.push_back(elapsed);
    }

    /// Records the elapsed time when the returned guard drops.
    pub fn start_timer(&self, operation: &'static str) -> Timer<'_> {
        Timer {
            operation,
            start: Instant::now(),
            tracker: self,
        }
    }

    pub fn sample_count(&self, operation: &str) -> usize {
        self.samples.get(operation).map(|w| w.len()).unwrap_or(0)
    }

    pub fn summary(&self, operation: &str) -> Option<LatencySummary> {
        let window = self.samples.get(operation)?;
        summarize(window.iter().copied().collect())
    }

    pub fn log_summary(&self) {
        let mut operations: Vec<&'static str> = self.samples.iter().map(|e| *e.key()).collect();
        operations.sort_unstable();

        for operation in operations {
            if let Some(s) = self.summary(operation) {
                info!(
                    operation,
                    p50_ms = s.p50.as_secs_f64() * 1000.0,
                    p95_ms = s.p95.as_secs_f64() * 1000.0,
                    p99_ms = s.p99.as_secs_f64() * 1000.0,
                    samples = s.samples,
                    "latency"
                );
            }
        }
    }
}

fn summarize(mut sorted: Vec<Duration>) -> Option<LatencySummary> {
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable();

    let last = sorted.len() - 1;
    let at = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(last)];

    Some(LatencySummary {
        p50: at(0.50),
        p95: at(0.95),
        p99: at(0.99),
        samples: sorted.len(),
    })
}

pub struct Timer<'a> {
    operation: &'static str,
    start: Instant,
    tracker: &'a LatencyTracker,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.tracker.record(self.operation, self.start.elapsed());
    }
}
