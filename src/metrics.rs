//! Prometheus metrics definitions for overlay-resource-governor.
//!
//! Gauges are refreshed from `get_stats()` on every scrape; counters are fed
//! by the optimizer's cycle listener.

use overlay_resource_governor::{CycleListener, GovernorStats, OptimizationCycleResult};
use prometheus::{Gauge, IntCounter, Registry};
use tracing::{debug, info};

#[derive(Clone)]
pub struct GovernorMetrics {
    pub rss: Gauge,
    pub heap_used: Gauge,
    pub heap_total: Gauge,
    pub external: Gauge,
    pub peak_rss: Gauge,
    pub samples: Gauge,

    pub icon_cache_size: Gauge,
    pub icon_cache_max: Gauge,

    pub cycles_total: IntCounter,
    pub evicted_files_total: IntCounter,
    pub evicted_bytes_total: IntCounter,
    pub gc_runs_total: IntCounter,
    pub gc_last_freed: Gauge,
    pub leak_suspected: Gauge,
}

impl GovernorMetrics {
    /// Creates and registers all metrics with the registry.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            rss: Gauge::new(
                "resource_governor_rss_bytes",
                "Resident set size of the governed process",
            )?,
            heap_used: Gauge::new(
                "resource_governor_heap_used_bytes",
                "Resident anonymous memory of the governed process",
            )?,
            heap_total: Gauge::new(
                "resource_governor_heap_total_bytes",
                "Data segment size of the governed process",
            )?,
            external: Gauge::new(
                "resource_governor_external_bytes",
                "Resident file-backed and shared memory",
            )?,
            peak_rss: Gauge::new(
                "resource_governor_peak_rss_bytes",
                "Highest RSS within the sampling window",
            )?,
            samples: Gauge::new(
                "resource_governor_memory_samples",
                "Number of samples in the sampling window",
            )?,
            icon_cache_size: Gauge::new(
                "resource_governor_icon_cache_bytes",
                "Current size of the icon cache directory",
            )?,
            icon_cache_max: Gauge::new(
                "resource_governor_icon_cache_max_bytes",
                "Configured icon cache budget",
            )?,
            cycles_total: IntCounter::new(
                "resource_governor_cycles_total",
                "Completed optimization cycles",
            )?,
            evicted_files_total: IntCounter::new(
                "resource_governor_evicted_files_total",
                "Icon files removed by cache cleanup",
            )?,
            evicted_bytes_total: IntCounter::new(
                "resource_governor_evicted_bytes_total",
                "Bytes freed by cache cleanup",
            )?,
            gc_runs_total: IntCounter::new(
                "resource_governor_gc_runs_total",
                "Manual collections performed",
            )?,
            gc_last_freed: Gauge::new(
                "resource_governor_gc_last_freed_bytes",
                "Heap bytes freed by the last manual collection",
            )?,
            leak_suspected: Gauge::new(
                "resource_governor_leak_suspected",
                "Whether the last leak check flagged sustained growth (1) or not (0)",
            )?,
        };

        registry.register(Box::new(metrics.rss.clone()))?;
        registry.register(Box::new(metrics.heap_used.clone()))?;
        registry.register(Box::new(metrics.heap_total.clone()))?;
        registry.register(Box::new(metrics.external.clone()))?;
        registry.register(Box::new(metrics.peak_rss.clone()))?;
        registry.register(Box::new(metrics.samples.clone()))?;
        registry.register(Box::new(metrics.icon_cache_size.clone()))?;
        registry.register(Box::new(metrics.icon_cache_max.clone()))?;
        registry.register(Box::new(metrics.cycles_total.clone()))?;
        registry.register(Box::new(metrics.evicted_files_total.clone()))?;
        registry.register(Box::new(metrics.evicted_bytes_total.clone()))?;
        registry.register(Box::new(metrics.gc_runs_total.clone()))?;
        registry.register(Box::new(metrics.gc_last_freed.clone()))?;
        registry.register(Box::new(metrics.leak_suspected.clone()))?;

        debug!("All governor metrics registered");
        Ok(metrics)
    }

    /// Refreshes gauges from a stats snapshot.
    pub fn observe_stats(&self, stats: &GovernorStats) {
        if let Some(mem) = &stats.memory {
            self.rss.set(mem.current.rss as f64);
            self.heap_used.set(mem.current.heap_used as f64);
            self.heap_total.set(mem.current.heap_total as f64);
            self.external.set(mem.current.external as f64);
            self.peak_rss.set(mem.peak.rss as f64);
            self.samples.set(mem.measurements as f64);
        }
        self.icon_cache_size.set(stats.icon_cache.size as f64);
        self.icon_cache_max.set(stats.icon_cache.max_size as f64);
    }
}

impl CycleListener for GovernorMetrics {
    fn on_cycle(&self, result: &OptimizationCycleResult) {
        self.cycles_total.inc();
        self.evicted_files_total.inc_by(result.icon_cache.removed);
        self.evicted_bytes_total.inc_by(result.icon_cache.freed_bytes);
        if let Some(gc) = &result.gc {
            self.gc_runs_total.inc();
            self.gc_last_freed.set(gc.freed as f64);
        }
        if let Some(leak) = &result.leak {
            self.leak_suspected.set(if leak.likely_leak { 1.0 } else { 0.0 });
        }

        match serde_json::to_string(result) {
            Ok(json) => info!(target: "governor::cycle", "{}", json),
            Err(e) => debug!("Failed to serialize cycle result: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_resource_governor::{CleanupResult, GcResult, IconCacheUsage};

    #[test]
    fn test_cycle_listener_updates_counters() {
        let registry = Registry::new();
        let metrics = GovernorMetrics::new(&registry).unwrap();

        metrics.on_cycle(&OptimizationCycleResult {
            icon_cache: CleanupResult {
                removed: 3,
                freed_bytes: 4096,
            },
            gc: Some(GcResult {
                freed: 512,
                before: 2048,
                after: 1536,
            }),
            leak: None,
        });

        assert_eq!(metrics.cycles_total.get(), 1);
        assert_eq!(metrics.evicted_files_total.get(), 3);
        assert_eq!(metrics.evicted_bytes_total.get(), 4096);
        assert_eq!(metrics.gc_runs_total.get(), 1);
        assert_eq!(metrics.gc_last_freed.get(), 512.0);
    }

    #[test]
    fn test_observe_stats_without_samples() {
        let registry = Registry::new();
        let metrics = GovernorMetrics::new(&registry).unwrap();
        metrics.observe_stats(&GovernorStats {
            memory: None,
            icon_cache: IconCacheUsage {
                size: 10,
                max_size: 100,
            },
        });
        assert_eq!(metrics.icon_cache_size.get(), 10.0);
        assert_eq!(metrics.icon_cache_max.get(), 100.0);
        assert_eq!(metrics.rss.get(), 0.0);
    }
}
