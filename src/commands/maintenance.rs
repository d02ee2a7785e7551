//! One-shot governor operations against the configured cache directory.
//!
//! Each command builds its own governor parts, runs once and prints the
//! result as pretty JSON on stdout.

use anyhow::Result;
use overlay_resource_governor::{
    CacheStats, IconCacheManager, LeakReport, MemoryMonitor, MemoryOptimizer, MemoryStats,
    ProcSelfSource, SystemClock,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

/// Pause between samples taken by `stats -n`.
const SAMPLE_SPACING: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub memory: Option<MemoryStats>,
    pub icon_cache: CacheStats,
    pub leak: Option<LeakReport>,
}

/// Runs a single optimization pass.
pub fn command_optimize(config: &Config) -> Result<()> {
    let optimizer = MemoryOptimizer::new(config.optimizer_settings()?);
    let result = optimizer.optimize();
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Deletes every file in the icon cache.
pub fn command_clear_cache(config: &Config) -> Result<()> {
    let manager = IconCacheManager::new(
        config.cache_dir(),
        config.max_cache_bytes(),
        Arc::new(SystemClock),
    );
    let result = manager.clear_all();
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Samples memory `samples` times and reports window and cache statistics.
pub fn command_stats(samples: usize, config: &Config) -> Result<()> {
    let report = collect_stats(samples, config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn collect_stats(samples: usize, config: &Config) -> Result<StatsReport> {
    let settings = config.optimizer_settings()?;
    let monitor = MemoryMonitor::new(
        settings.monitor_interval,
        settings.max_measurements,
        Arc::new(SystemClock),
        Arc::new(ProcSelfSource),
    )
    .with_leak_policy(
        settings.leak_strategy.policy(settings.leak_growth_threshold),
        settings.leak_min_samples,
    );

    for i in 0..samples {
        if i > 0 {
            std::thread::sleep(SAMPLE_SPACING);
        }
        monitor.sample_now();
    }
    debug!(
        "Collected {} memory samples (window holds {})",
        samples,
        monitor.max_measurements()
    );

    let manager = IconCacheManager::new(
        &settings.cache_dir,
        settings.max_cache_bytes,
        Arc::new(SystemClock),
    );

    Ok(StatsReport {
        memory: monitor.get_stats(),
        icon_cache: manager.stats(),
        leak: monitor.check_for_leaks(),
    })
}
