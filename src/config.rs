//! Configuration loading, merging and validation.
//!
//! Values come from (highest precedence first) CLI flags, a YAML/JSON/TOML
//! config file, and built-in defaults.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use overlay_resource_governor::{default_cache_dir, LeakStrategy, OptimizerSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::Args;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9317;
pub const DEFAULT_MAX_CACHE_KB: u64 = 50 * 1024;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_OPTIMIZE_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_GC_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_MAX_MEASUREMENTS: usize = 60;
pub const DEFAULT_LEAK_MIN_SAMPLES: usize = 10;
pub const DEFAULT_LEAK_GROWTH_THRESHOLD: f64 = 0.20;
pub const DEFAULT_LOG_RETENTION_DAYS: usize = 30;

/// Resolved once; depends on the executable location.
static DEFAULT_CACHE_DIR: Lazy<PathBuf> = Lazy::new(default_cache_dir);

static DEFAULT_LOG_FILE: Lazy<PathBuf> = Lazy::new(|| {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs")
        .join("overlay-resource-governor.log")
});

const DEFAULT_CONFIG_PATHS: [&str; 4] = [
    "/etc/overlay-resource-governor/config.yaml",
    "./overlay-resource-governor.yaml",
    "./overlay-resource-governor.yml",
    "./overlay-resource-governor.json",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Diagnostics server
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Icon cache
    #[serde(alias = "cache-dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(alias = "max-cache-kb")]
    pub max_cache_kb: Option<u64>,

    // Timers
    #[serde(alias = "monitor-interval-ms")]
    pub monitor_interval_ms: Option<u64>,
    #[serde(alias = "optimize-interval-ms")]
    pub optimize_interval_ms: Option<u64>,
    #[serde(alias = "gc-interval-ms")]
    pub gc_interval_ms: Option<u64>,

    // Leak detection
    #[serde(alias = "max-measurements")]
    pub max_measurements: Option<usize>,
    #[serde(alias = "leak-min-samples")]
    pub leak_min_samples: Option<usize>,
    /// "half-mean" | "slope"
    #[serde(alias = "leak-strategy")]
    pub leak_strategy: Option<String>,
    #[serde(alias = "leak-growth-threshold")]
    pub leak_growth_threshold: Option<f64>,

    // Feature flags
    pub enable_gc_hook: Option<bool>,
    pub enable_health: Option<bool>,
    pub enable_telemetry: Option<bool>,

    // Logging
    pub log_level: Option<String>,
    pub enable_file_logging: Option<bool>,
    pub log_file: Option<PathBuf>,
    /// Daily log files kept before the oldest is removed
    #[serde(alias = "log-retention-days")]
    pub log_retention_days: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            cache_dir: Some(DEFAULT_CACHE_DIR.clone()),
            max_cache_kb: Some(DEFAULT_MAX_CACHE_KB),
            monitor_interval_ms: Some(DEFAULT_MONITOR_INTERVAL_MS),
            optimize_interval_ms: Some(DEFAULT_OPTIMIZE_INTERVAL_MS),
            gc_interval_ms: Some(DEFAULT_GC_INTERVAL_MS),
            max_measurements: Some(DEFAULT_MAX_MEASUREMENTS),
            leak_min_samples: Some(DEFAULT_LEAK_MIN_SAMPLES),
            leak_strategy: Some(LeakStrategy::default().to_string()),
            leak_growth_threshold: Some(DEFAULT_LEAK_GROWTH_THRESHOLD),
            enable_gc_hook: Some(true),
            enable_health: Some(true),
            enable_telemetry: Some(true),
            log_level: Some("info".into()),
            enable_file_logging: Some(false),
            log_file: None,
            log_retention_days: Some(DEFAULT_LOG_RETENTION_DAYS),
        }
    }
}

impl Config {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_CACHE_DIR.clone())
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_kb
            .unwrap_or(DEFAULT_MAX_CACHE_KB)
            .saturating_mul(1024)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_FILE.clone())
    }

    pub fn log_retention_days(&self) -> usize {
        self.log_retention_days
            .unwrap_or(DEFAULT_LOG_RETENTION_DAYS)
    }

    pub fn leak_strategy(&self) -> Result<LeakStrategy> {
        match self.leak_strategy.as_deref() {
            None => Ok(LeakStrategy::default()),
            Some(s) => s.parse::<LeakStrategy>().map_err(anyhow::Error::msg),
        }
    }

    /// Governor settings for the effective configuration.
    pub fn optimizer_settings(&self) -> Result<OptimizerSettings> {
        let mut settings = OptimizerSettings::new(self.cache_dir(), self.max_cache_bytes());
        settings.monitor_interval = Duration::from_millis(
            self.monitor_interval_ms.unwrap_or(DEFAULT_MONITOR_INTERVAL_MS),
        );
        settings.optimize_interval = Duration::from_millis(
            self.optimize_interval_ms
                .unwrap_or(DEFAULT_OPTIMIZE_INTERVAL_MS),
        );
        settings.gc_interval =
            Duration::from_millis(self.gc_interval_ms.unwrap_or(DEFAULT_GC_INTERVAL_MS));
        settings.max_measurements = self.max_measurements.unwrap_or(DEFAULT_MAX_MEASUREMENTS);
        settings.leak_min_samples = self.leak_min_samples.unwrap_or(DEFAULT_LEAK_MIN_SAMPLES);
        settings.leak_strategy = self.leak_strategy()?;
        settings.leak_growth_threshold = self
            .leak_growth_threshold
            .unwrap_or(DEFAULT_LEAK_GROWTH_THRESHOLD);
        settings.enable_gc_hook = self.enable_gc_hook.unwrap_or(true);
        Ok(settings)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    let max_cache_kb = cfg.max_cache_kb.unwrap_or(DEFAULT_MAX_CACHE_KB);
    if max_cache_kb == 0 {
        bail!("max_cache_kb must be greater than 0");
    }
    if max_cache_kb.checked_mul(1024).is_none() {
        bail!("max_cache_kb {} is too large", max_cache_kb);
    }

    for (name, value) in [
        ("monitor_interval_ms", cfg.monitor_interval_ms),
        ("optimize_interval_ms", cfg.optimize_interval_ms),
        ("gc_interval_ms", cfg.gc_interval_ms),
    ] {
        if value == Some(0) {
            bail!("{} must be greater than 0", name);
        }
    }

    let max_measurements = cfg.max_measurements.unwrap_or(DEFAULT_MAX_MEASUREMENTS);
    let min_samples = cfg.leak_min_samples.unwrap_or(DEFAULT_LEAK_MIN_SAMPLES);
    if min_samples < 3 {
        bail!("leak_min_samples must be at least 3, got {}", min_samples);
    }
    if min_samples > max_measurements {
        bail!(
            "leak_min_samples ({}) exceeds max_measurements ({}); leak checks would never run",
            min_samples,
            max_measurements
        );
    }

    let threshold = cfg
        .leak_growth_threshold
        .unwrap_or(DEFAULT_LEAK_GROWTH_THRESHOLD);
    if !(threshold.is_finite() && threshold > 0.0) {
        bail!("leak_growth_threshold must be a positive number, got {}", threshold);
    }

    cfg.leak_strategy()?;

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(level, "off" | "error" | "warn" | "info" | "debug" | "trace") {
            bail!("Invalid log_level '{}'", level);
        }
    }
    if cfg.log_retention_days == Some(0) {
        bail!("log_retention_days must be greater than 0");
    }

    Ok(())
}

/// Merges CLI overrides over the loaded config file.
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if args.max_cache_kb.is_some() {
        config.max_cache_kb = args.max_cache_kb;
    }
    if args.monitor_interval_ms.is_some() {
        config.monitor_interval_ms = args.monitor_interval_ms;
    }
    if args.optimize_interval_ms.is_some() {
        config.optimize_interval_ms = args.optimize_interval_ms;
    }
    if args.gc_interval_ms.is_some() {
        config.gc_interval_ms = args.gc_interval_ms;
    }
    if args.max_measurements.is_some() {
        config.max_measurements = args.max_measurements;
    }
    if let Some(strategy) = &args.leak_strategy {
        config.leak_strategy = Some(strategy.clone());
    }

    // Feature flags
    if args.disable_gc_hook {
        config.enable_gc_hook = Some(false);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.disable_telemetry {
        config.enable_telemetry = Some(false);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }
    if let Some(path) = &args.log_file {
        config.enable_file_logging = Some(true);
        config.log_file = Some(path.clone());
    }

    Ok(config)
}

/// The explicit config path, or the first default location that exists.
pub fn user_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists()),
    }
}

/// Loads the config file at `path`, or the first default location that exists.
///
/// Fields missing from the file keep their defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = user_config_path(path) else {
        return Ok(Config::default());
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let loaded: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON config {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML config {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML config {}", path.display()))?,
    };
    info!("Loaded configuration from: {}", path.display());

    Ok(merge_defaults(loaded))
}

fn merge_defaults(cfg: Config) -> Config {
    let d = Config::default();
    Config {
        port: cfg.port.or(d.port),
        bind: cfg.bind.or(d.bind),
        cache_dir: cfg.cache_dir.or(d.cache_dir),
        max_cache_kb: cfg.max_cache_kb.or(d.max_cache_kb),
        monitor_interval_ms: cfg.monitor_interval_ms.or(d.monitor_interval_ms),
        optimize_interval_ms: cfg.optimize_interval_ms.or(d.optimize_interval_ms),
        gc_interval_ms: cfg.gc_interval_ms.or(d.gc_interval_ms),
        max_measurements: cfg.max_measurements.or(d.max_measurements),
        leak_min_samples: cfg.leak_min_samples.or(d.leak_min_samples),
        leak_strategy: cfg.leak_strategy.or(d.leak_strategy),
        leak_growth_threshold: cfg.leak_growth_threshold.or(d.leak_growth_threshold),
        enable_gc_hook: cfg.enable_gc_hook.or(d.enable_gc_hook),
        enable_health: cfg.enable_health.or(d.enable_health),
        enable_telemetry: cfg.enable_telemetry.or(d.enable_telemetry),
        log_level: cfg.log_level.or(d.log_level),
        enable_file_logging: cfg.enable_file_logging.or(d.enable_file_logging),
        log_file: cfg.log_file.or(d.log_file),
        log_retention_days: cfg.log_retention_days.or(d.log_retention_days),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_effective_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_budget_and_intervals() {
        let cfg = Config {
            max_cache_kb: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        let cfg = Config {
            gc_interval_ms: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_rejects_budget_overflowing_bytes() {
        let cfg = Config {
            max_cache_kb: Some(u64::MAX / 512),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
        assert_eq!(cfg.max_cache_bytes(), u64::MAX);

        let cfg = Config {
            max_cache_kb: Some(u64::MAX / 1024),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_ok());
    }

    #[test]
    fn test_log_retention_defaults_and_rejects_zero() {
        let cfg = Config {
            log_retention_days: None,
            ..Config::default()
        };
        assert_eq!(cfg.log_retention_days(), DEFAULT_LOG_RETENTION_DAYS);
        assert!(validate_effective_config(&cfg).is_ok());

        let cfg = Config {
            log_retention_days: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_rejects_window_smaller_than_leak_minimum() {
        let cfg = Config {
            max_measurements: Some(5),
            leak_min_samples: Some(10),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        let cfg = Config {
            leak_min_samples: Some(2),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let cfg = Config {
            leak_strategy: Some("median".into()),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_load_yaml_keeps_defaults_for_missing_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("governor.yaml");
        fs::write(&path, "max_cache_kb: 2048\nleak-strategy: slope\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.max_cache_bytes(), 2048 * 1024);
        assert_eq!(cfg.leak_strategy().unwrap(), LeakStrategy::Slope);
        assert_eq!(cfg.port, Some(DEFAULT_PORT));
        assert_eq!(cfg.max_measurements, Some(DEFAULT_MAX_MEASUREMENTS));
    }

    #[test]
    fn test_load_json_and_toml() {
        let tmp = TempDir::new().unwrap();
        let json = tmp.path().join("governor.json");
        fs::write(&json, r#"{"gc_interval_ms": 1000}"#).unwrap();
        assert_eq!(load_config(Some(&json)).unwrap().gc_interval_ms, Some(1000));

        let toml_path = tmp.path().join("governor.toml");
        fs::write(&toml_path, "port = 9999\n").unwrap();
        assert_eq!(load_config(Some(&toml_path)).unwrap().port, Some(9999));
    }

    #[test]
    fn test_optimizer_settings_conversion() {
        let cfg = Config {
            cache_dir: Some(PathBuf::from("/tmp/icons")),
            max_cache_kb: Some(100),
            monitor_interval_ms: Some(1_500),
            enable_gc_hook: Some(false),
            ..Config::default()
        };
        let s = cfg.optimizer_settings().unwrap();
        assert_eq!(s.cache_dir, PathBuf::from("/tmp/icons"));
        assert_eq!(s.max_cache_bytes, 102_400);
        assert_eq!(s.monitor_interval, Duration::from_millis(1_500));
        assert!(!s.enable_gc_hook);
    }
}
