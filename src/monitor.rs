//! Periodic process memory sampling with a bounded window.
//!
//! [`MemoryMonitor`] keeps the most recent `max_measurements` samples in a ring
//! buffer, exposes current/average/peak figures over that window and runs the
//! configured [`LeakPolicy`] once enough history exists.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::leak::{LeakPolicy, LeakReport, LeakStrategy, DEFAULT_GROWTH_THRESHOLD, MIN_LEAK_SAMPLES};
use crate::system::read_process_memory;
use crate::ticker::Ticker;

/// Immutable snapshot of the process memory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub heap_used: u64,
    pub heap_total: u64,
    pub external: u64,
    pub rss: u64,
}

/// Per-field aggregate over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFigures {
    pub heap_used: u64,
    pub heap_total: u64,
    pub external: u64,
    pub rss: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub current: MemorySample,
    pub average: MemoryFigures,
    pub peak: MemoryFigures,
    pub measurements: usize,
}

/// Where samples come from. Must not fail.
pub trait MemorySource: Send + Sync {
    fn sample(&self, timestamp: i64) -> MemorySample;
}

/// Reads the current process from /proc/self/status.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcSelfSource;

impl MemorySource for ProcSelfSource {
    fn sample(&self, timestamp: i64) -> MemorySample {
        match read_process_memory() {
            Ok(mem) => MemorySample {
                timestamp,
                heap_used: mem.heap_used,
                heap_total: mem.heap_total,
                external: mem.external,
                rss: mem.rss,
            },
            Err(e) => {
                debug!("Memory counters unavailable, recording empty sample: {}", e);
                MemorySample {
                    timestamp,
                    ..Default::default()
                }
            }
        }
    }
}

type Window = Arc<Mutex<VecDeque<MemorySample>>>;

pub struct MemoryMonitor {
    interval: Duration,
    max_measurements: usize,
    min_leak_samples: usize,
    policy: Box<dyn LeakPolicy>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn MemorySource>,
    window: Window,
    ticker: Mutex<Option<Ticker>>,
}

impl MemoryMonitor {
    pub fn new(
        interval: Duration,
        max_measurements: usize,
        clock: Arc<dyn Clock>,
        source: Arc<dyn MemorySource>,
    ) -> Self {
        let max_measurements = max_measurements.max(1);
        Self {
            interval,
            max_measurements,
            min_leak_samples: MIN_LEAK_SAMPLES,
            policy: LeakStrategy::default().policy(DEFAULT_GROWTH_THRESHOLD),
            clock,
            source,
            window: Arc::new(Mutex::new(VecDeque::with_capacity(max_measurements))),
            ticker: Mutex::new(None),
        }
    }

    /// Replaces the leak heuristic and its minimum sample count.
    pub fn with_leak_policy(mut self, policy: Box<dyn LeakPolicy>, min_samples: usize) -> Self {
        self.policy = policy;
        self.min_leak_samples = min_samples;
        self
    }

    pub fn max_measurements(&self) -> usize {
        self.max_measurements
    }

    /// One-shot snapshot, not recorded in the window.
    pub fn get_memory_usage(&self) -> MemorySample {
        self.source.sample(self.clock.now_millis())
    }

    /// Takes an immediate sample and starts periodic sampling.
    pub fn start(&self) {
        let mut ticker = lock(&self.ticker);
        if ticker.is_some() {
            return;
        }

        record(&self.window, self.get_memory_usage(), self.max_measurements);

        let window = self.window.clone();
        let source = self.source.clone();
        let clock = self.clock.clone();
        let max = self.max_measurements;
        *ticker = Ticker::spawn("memory-monitor", self.interval, move || {
            let sample = source.sample(clock.now_millis());
            debug!("Memory sample: rss={} heap_used={}", sample.rss, sample.heap_used);
            record(&window, sample, max);
        });

        if ticker.is_some() {
            info!(
                "Memory monitor started: every {:?}, keeping {} samples",
                self.interval, self.max_measurements
            );
        }
    }

    pub fn stop(&self) {
        if let Some(ticker) = lock(&self.ticker).take() {
            ticker.cancel();
            info!("Memory monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ticker).is_some()
    }

    /// Appends a sample taken now, as a timer tick would.
    pub fn sample_now(&self) {
        record(&self.window, self.get_memory_usage(), self.max_measurements);
    }

    /// `None` until the window holds enough samples for a verdict.
    pub fn check_for_leaks(&self) -> Option<LeakReport> {
        let mut window = lock(&self.window);
        if window.len() < self.min_leak_samples {
            debug!(
                "Leak check skipped: {} of {} samples",
                window.len(),
                self.min_leak_samples
            );
            return None;
        }
        Some(self.policy.evaluate(window.make_contiguous()))
    }

    pub fn get_stats(&self) -> Option<MemoryStats> {
        let window = lock(&self.window);
        let current = *window.back()?;
        let n = window.len() as u128;

        let mut sum = [0u128; 4];
        let mut peak = MemoryFigures::default();
        for s in window.iter() {
            sum[0] += s.heap_used as u128;
            sum[1] += s.heap_total as u128;
            sum[2] += s.external as u128;
            sum[3] += s.rss as u128;
            peak.heap_used = peak.heap_used.max(s.heap_used);
            peak.heap_total = peak.heap_total.max(s.heap_total);
            peak.external = peak.external.max(s.external);
            peak.rss = peak.rss.max(s.rss);
        }

        Some(MemoryStats {
            current,
            average: MemoryFigures {
                heap_used: (sum[0] / n) as u64,
                heap_total: (sum[1] / n) as u64,
                external: (sum[2] / n) as u64,
                rss: (sum[3] / n) as u64,
            },
            peak,
            measurements: window.len(),
        })
    }

    /// Copy of the current window, oldest first.
    pub fn measurements(&self) -> Vec<MemorySample> {
        lock(&self.window).iter().copied().collect()
    }
}

fn record(window: &Window, sample: MemorySample, max: usize) {
    let mut w = lock(window);
    w.push_back(sample);
    while w.len() > max {
        w.pop_front();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Reports a counter that grows by `step` bytes per sample.
    struct GrowingSource {
        next: AtomicU64,
        step: u64,
    }

    impl MemorySource for GrowingSource {
        fn sample(&self, timestamp: i64) -> MemorySample {
            let v = self.next.fetch_add(self.step, Ordering::SeqCst);
            MemorySample {
                timestamp,
                heap_used: v,
                heap_total: v * 2,
                external: 1,
                rss: v + 100,
            }
        }
    }

    fn monitor(max: usize, step: u64) -> MemoryMonitor {
        let source = Arc::new(GrowingSource {
            next: AtomicU64::new(1_000),
            step,
        });
        MemoryMonitor::new(
            Duration::from_secs(1),
            max,
            Arc::new(ManualClock::new(0)),
            source,
        )
    }

    #[test]
    fn test_stats_none_without_samples() {
        let m = monitor(5, 0);
        assert!(m.get_stats().is_none());
        assert!(m.check_for_leaks().is_none());
    }

    #[test]
    fn test_window_is_bounded() {
        let m = monitor(3, 10);
        for _ in 0..10 {
            m.sample_now();
        }
        let samples = m.measurements();
        assert_eq!(samples.len(), 3);
        // oldest dropped first
        assert_eq!(samples[0].heap_used, 1_070);
        assert_eq!(samples[2].heap_used, 1_090);
    }

    #[test]
    fn test_zero_capacity_keeps_one_sample() {
        let m = monitor(0, 10);
        assert_eq!(m.max_measurements(), 1);
        m.sample_now();
        m.sample_now();
        assert_eq!(m.measurements().len(), 1);
        assert_eq!(m.get_stats().unwrap().current.heap_used, 1_010);
    }

    #[test]
    fn test_stats_current_average_peak() {
        let m = monitor(10, 10);
        m.sample_now();
        m.sample_now();
        m.sample_now();

        let stats = m.get_stats().unwrap();
        assert_eq!(stats.measurements, 3);
        assert_eq!(stats.current.heap_used, 1_020);
        assert_eq!(stats.average.heap_used, 1_010);
        assert_eq!(stats.peak.heap_used, 1_020);
        assert_eq!(stats.peak.rss, 1_120);
        assert_eq!(stats.average.external, 1);
    }

    #[test]
    fn test_leak_check_needs_minimum_samples() {
        let m = monitor(20, 1_000);
        m.sample_now();
        m.sample_now();
        assert!(m.check_for_leaks().is_none());

        for _ in 2..MIN_LEAK_SAMPLES {
            m.sample_now();
        }
        let report = m.check_for_leaks().unwrap();
        assert_eq!(report.samples, MIN_LEAK_SAMPLES);
        assert!(report.likely_leak);
    }

    #[test]
    fn test_custom_policy_threshold() {
        let m = monitor(20, 0).with_leak_policy(LeakStrategy::Slope.policy(0.1), 3);
        for _ in 0..3 {
            m.sample_now();
        }
        let report = m.check_for_leaks().unwrap();
        assert_eq!(report.strategy, LeakStrategy::Slope);
        assert!(!report.likely_leak);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let m = monitor(3, 0);
        m.stop();
        assert!(!m.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_samples_immediately_and_on_ticks() {
        let m = monitor(4, 1);
        m.start();
        assert!(m.is_running());
        assert_eq!(m.measurements().len(), 1);

        // Second start is ignored
        m.start();
        assert_eq!(m.measurements().len(), 1);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(m.measurements().len(), 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(m.measurements().len(), 4);

        m.stop();
        assert!(!m.is_running());
        m.stop();
    }

    #[test]
    fn test_proc_source_never_fails() {
        let sample = ProcSelfSource.sample(42);
        assert_eq!(sample.timestamp, 42);
    }
}
