//! Periodic optimization cycle tying the cache, monitor and GC helper together.
//!
//! One [`MemoryOptimizer`] is owned by the host application: created at
//! startup, [`start`](MemoryOptimizer::start)ed, and
//! [`stop`](MemoryOptimizer::stop)ped during shutdown. Starting couples two
//! timers, the monitor's sampling ticker and the optimizer's own cycle ticker.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::gc::{platform_gc_hook, GcHelper, GcHook, GcResult};
use crate::icon_cache::{CacheStats, CleanupResult, IconCacheManager};
use crate::leak::{LeakReport, LeakStrategy, DEFAULT_GROWTH_THRESHOLD, MIN_LEAK_SAMPLES};
use crate::monitor::{MemoryMonitor, MemorySource, MemoryStats, ProcSelfSource};
use crate::ticker::Ticker;

pub const DEFAULT_MAX_CACHE_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_OPTIMIZE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_MEASUREMENTS: usize = 60;

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub cache_dir: PathBuf,
    pub max_cache_bytes: u64,
    pub monitor_interval: Duration,
    pub optimize_interval: Duration,
    pub gc_interval: Duration,
    pub max_measurements: usize,
    pub leak_min_samples: usize,
    pub leak_strategy: LeakStrategy,
    pub leak_growth_threshold: f64,
    pub enable_gc_hook: bool,
}

impl OptimizerSettings {
    pub fn new(cache_dir: impl Into<PathBuf>, max_cache_bytes: u64) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_cache_bytes,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            optimize_interval: DEFAULT_OPTIMIZE_INTERVAL,
            gc_interval: DEFAULT_GC_INTERVAL,
            max_measurements: DEFAULT_MAX_MEASUREMENTS,
            leak_min_samples: MIN_LEAK_SAMPLES,
            leak_strategy: LeakStrategy::default(),
            leak_growth_threshold: DEFAULT_GROWTH_THRESHOLD,
            enable_gc_hook: true,
        }
    }
}

/// Host services the governor reads from. Swapped out in tests.
#[derive(Clone)]
pub struct HostBindings {
    pub clock: Arc<dyn Clock>,
    pub memory: Arc<dyn MemorySource>,
    pub gc_hook: Option<Arc<dyn GcHook>>,
}

impl HostBindings {
    pub fn system() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            memory: Arc::new(ProcSelfSource),
            gc_hook: platform_gc_hook(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationCycleResult {
    pub icon_cache: CleanupResult,
    pub gc: Option<GcResult>,
    pub leak: Option<LeakReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IconCacheUsage {
    pub size: u64,
    pub max_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorStats {
    pub memory: Option<MemoryStats>,
    pub icon_cache: IconCacheUsage,
}

/// Receives every cycle result, e.g. for logging or metrics.
pub trait CycleListener: Send + Sync {
    fn on_cycle(&self, result: &OptimizationCycleResult);
}

struct OptimizerCore {
    icon_cache: IconCacheManager,
    monitor: MemoryMonitor,
    gc: GcHelper,
    cycles: AtomicU64,
    listener: Mutex<Option<Arc<dyn CycleListener>>>,
}

impl OptimizerCore {
    fn optimize(&self) -> OptimizationCycleResult {
        let result = OptimizationCycleResult {
            icon_cache: self.icon_cache.cleanup(),
            gc: self.gc.request_gc_if_needed(),
            leak: self.monitor.check_for_leaks(),
        };
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(leak) = result.leak.as_ref().filter(|l| l.likely_leak) {
            warn!(
                "Possible memory leak ({}): rss {:+} bytes ({:.1}%), heap {:+} bytes ({:.1}%) over {} samples",
                leak.strategy,
                leak.rss.growth_bytes,
                leak.rss.growth_ratio * 100.0,
                leak.heap_used.growth_bytes,
                leak.heap_used.growth_ratio * 100.0,
                leak.samples
            );
        }
        info!(
            "Optimization cycle {}: evicted {} icons ({} bytes), gc freed {}",
            cycle,
            result.icon_cache.removed,
            result.icon_cache.freed_bytes,
            result
                .gc
                .map(|g| g.freed.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );

        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.on_cycle(&result);
        }
        result
    }
}

pub struct MemoryOptimizer {
    core: Arc<OptimizerCore>,
    optimize_interval: Duration,
    cycle: Mutex<Option<Ticker>>,
}

impl MemoryOptimizer {
    /// Governor for `settings` wired to the real host.
    pub fn new(settings: OptimizerSettings) -> Self {
        Self::with_bindings(settings, HostBindings::system())
    }

    pub fn with_bindings(settings: OptimizerSettings, bindings: HostBindings) -> Self {
        let HostBindings {
            clock,
            memory,
            gc_hook,
        } = bindings;

        let icon_cache =
            IconCacheManager::new(&settings.cache_dir, settings.max_cache_bytes, clock.clone());
        let monitor = MemoryMonitor::new(
            settings.monitor_interval,
            settings.max_measurements,
            clock.clone(),
            memory.clone(),
        )
        .with_leak_policy(
            settings.leak_strategy.policy(settings.leak_growth_threshold),
            settings.leak_min_samples,
        );
        let gc_hook = if settings.enable_gc_hook { gc_hook } else { None };
        let gc = GcHelper::new(settings.gc_interval, gc_hook, memory, clock);

        debug!(
            "Memory optimizer configured: cache {} ({} bytes), gc hook available: {}",
            settings.cache_dir.display(),
            settings.max_cache_bytes,
            gc.is_available()
        );

        Self {
            core: Arc::new(OptimizerCore {
                icon_cache,
                monitor,
                gc,
                cycles: AtomicU64::new(0),
                listener: Mutex::new(None),
            }),
            optimize_interval: settings.optimize_interval,
            cycle: Mutex::new(None),
        }
    }

    pub fn set_cycle_listener(&self, listener: Arc<dyn CycleListener>) {
        *lock(&self.core.listener) = Some(listener);
    }

    /// Starts sampling and the optimization cycle. No-op when running.
    pub fn start(&self) {
        let mut cycle = lock(&self.cycle);
        if cycle.is_some() {
            return;
        }

        self.core.monitor.start();
        let core = self.core.clone();
        *cycle = Ticker::spawn("optimizer", self.optimize_interval, move || {
            core.optimize();
        });

        match cycle.as_ref() {
            Some(_) => info!(
                "Memory optimizer started: cycle every {:?}",
                self.optimize_interval
            ),
            None => {
                // No runtime: keep both timers in the same state.
                self.core.monitor.stop();
                warn!("Memory optimizer could not start its timers");
            }
        }
    }

    /// Cancels both timers. Safe to call at any time.
    pub fn stop(&self) {
        let ticker = lock(&self.cycle).take();
        self.core.monitor.stop();
        if let Some(ticker) = ticker {
            let name = ticker.name();
            ticker.cancel();
            info!("Memory optimizer stopped ({} ticker cancelled)", name);
        }
    }

    pub fn state(&self) -> OptimizerState {
        if lock(&self.cycle).is_some() {
            OptimizerState::Running
        } else {
            OptimizerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == OptimizerState::Running
    }

    /// Runs one cleanup / GC / leak-check pass right now.
    pub fn optimize(&self) -> OptimizationCycleResult {
        self.core.optimize()
    }

    pub fn get_stats(&self) -> GovernorStats {
        GovernorStats {
            memory: self.core.monitor.get_stats(),
            icon_cache: IconCacheUsage {
                size: self.core.icon_cache.get_cache_size(),
                max_size: self.core.icon_cache.max_size(),
            },
        }
    }

    pub fn record_icon_access(&self, name: &str) {
        self.core.icon_cache.record_access(name);
    }

    /// Administrative reset of the icon cache.
    pub fn clear_icon_cache(&self) -> CleanupResult {
        self.core.icon_cache.clear_all()
    }

    pub fn icon_cache_stats(&self) -> CacheStats {
        self.core.icon_cache.stats()
    }

    /// Number of completed optimization cycles.
    pub fn cycles(&self) -> u64 {
        self.core.cycles.load(Ordering::Relaxed)
    }

    pub fn gc_available(&self) -> bool {
        self.core.gc.is_available()
    }
}

impl Drop for MemoryOptimizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::monitor::MemorySample;
    use std::fs;
    use tempfile::TempDir;

    struct FixedSource;

    impl MemorySource for FixedSource {
        fn sample(&self, timestamp: i64) -> MemorySample {
            MemorySample {
                timestamp,
                heap_used: 10,
                heap_total: 20,
                external: 0,
                rss: 30,
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        results: Mutex<Vec<OptimizationCycleResult>>,
    }

    impl CycleListener for Recorder {
        fn on_cycle(&self, result: &OptimizationCycleResult) {
            self.results.lock().unwrap().push(result.clone());
        }
    }

    fn bindings() -> HostBindings {
        // Far in the future so recorded accesses are newer than any file mtime.
        HostBindings {
            clock: Arc::new(ManualClock::new(4_000_000_000_000)),
            memory: Arc::new(FixedSource),
            gc_hook: None,
        }
    }

    fn settings(dir: &TempDir, max: u64) -> OptimizerSettings {
        let mut s = OptimizerSettings::new(dir.path(), max);
        s.monitor_interval = Duration::from_secs(1);
        s.optimize_interval = Duration::from_secs(10);
        s
    }

    #[test]
    fn test_stop_before_start() {
        let tmp = TempDir::new().unwrap();
        let opt = MemoryOptimizer::with_bindings(settings(&tmp, 100), bindings());
        opt.stop();
        assert_eq!(opt.state(), OptimizerState::Stopped);
    }

    #[test]
    fn test_optimize_combines_results() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.ico"), vec![0u8; 80]).unwrap();
        fs::write(tmp.path().join("b.ico"), vec![0u8; 80]).unwrap();

        let opt = MemoryOptimizer::with_bindings(settings(&tmp, 100), bindings());
        let recorder = Arc::new(Recorder::default());
        opt.set_cycle_listener(recorder.clone());
        opt.record_icon_access("b.ico");

        let result = opt.optimize();
        assert_eq!(result.icon_cache.removed, 1);
        assert_eq!(result.icon_cache.freed_bytes, 80);
        assert!(result.gc.is_none());
        assert!(result.leak.is_none());
        assert_eq!(opt.cycles(), 1);
        assert_eq!(recorder.results.lock().unwrap().len(), 1);
        assert!(tmp.path().join("b.ico").exists());
    }

    #[test]
    fn test_stats_report_configured_budget() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.ico"), vec![0u8; 40]).unwrap();
        let opt = MemoryOptimizer::with_bindings(settings(&tmp, 100), bindings());

        let stats = opt.get_stats();
        assert!(stats.memory.is_none());
        assert_eq!(stats.icon_cache, IconCacheUsage { size: 40, max_size: 100 });

        opt.clear_icon_cache();
        assert_eq!(opt.get_stats().icon_cache.max_size, 100);
        assert_eq!(opt.icon_cache_stats().file_count, 0);
    }

    #[test]
    fn test_gc_hook_can_be_disabled() {
        struct Noop;
        impl GcHook for Noop {
            fn name(&self) -> &'static str {
                "noop"
            }
            fn collect(&self) {}
        }

        let tmp = TempDir::new().unwrap();
        let mut b = bindings();
        b.gc_hook = Some(Arc::new(Noop));

        let enabled = MemoryOptimizer::with_bindings(settings(&tmp, 100), b.clone());
        assert!(enabled.gc_available());
        assert!(enabled.optimize().gc.is_some());

        let mut s = settings(&tmp, 100);
        s.enable_gc_hook = false;
        let disabled = MemoryOptimizer::with_bindings(s, b);
        assert!(!disabled.gc_available());
        assert!(disabled.optimize().gc.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let opt = MemoryOptimizer::with_bindings(settings(&tmp, 100), bindings());

        opt.start();
        assert_eq!(opt.state(), OptimizerState::Running);
        assert!(opt.get_stats().memory.is_some());
        opt.start();

        // Between ticks: samples at 0..=25 s, cycles at 10 s and 20 s.
        tokio::time::sleep(Duration::from_millis(25_500)).await;
        assert_eq!(opt.cycles(), 2);
        assert_eq!(opt.get_stats().memory.unwrap().measurements, 26);

        opt.stop();
        assert_eq!(opt.state(), OptimizerState::Stopped);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(opt.cycles(), 2);
        opt.stop();
    }

    #[test]
    fn test_cycle_result_serializes_camel_case() {
        let result = OptimizationCycleResult {
            icon_cache: CleanupResult {
                removed: 2,
                freed_bytes: 100,
            },
            gc: None,
            leak: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["iconCache"]["freedBytes"], 100);
        assert!(json["gc"].is_null());
    }
}
