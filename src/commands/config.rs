//! Config command implementation and `--show-config` output.

use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::Config;

fn render(config: &Config, format: &ConfigFormat) -> Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Generates a configuration file populated with the defaults.
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat, commented: bool) -> Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("overlay-resource-governor.yaml"));

    let mut content = render(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Prints the effective config, or with `source` set, the file it was loaded from.
pub fn show_config(config: &Config, format: ConfigFormat, source: Option<PathBuf>) -> Result<()> {
    if let Some(path) = source {
        println!("User configuration: {}", path.display());
    }
    println!("{}", render(config, &format)?);
    Ok(())
}

fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Overlay Resource Governor Configuration
# =======================================
#
# Diagnostics Server
# ------------------
# bind: "127.0.0.1"            # Bind IP
# port: 9317                   # HTTP port
#
# Icon Cache
# ----------
# cache_dir: <exe dir>/cache/icons
# max_cache_kb: 51200          # Budget in KB; LRU eviction above it
#
# Timers
# ------
# monitor_interval_ms: 60000   # Memory sampling period
# optimize_interval_ms: 300000 # Optimization cycle period
# gc_interval_ms: 300000       # Minimum time between manual collections
#
# Leak Detection
# --------------
# max_measurements: 60         # Samples kept in the window
# leak_min_samples: 10         # Samples required before a verdict (3..=max_measurements)
# leak_strategy: "half-mean"   # "half-mean" or "slope"
# leak_growth_threshold: 0.2   # Relative growth that counts as sustained
#
# Feature Flags
# -------------
# enable_gc_hook: true         # Allow allocator trim as manual collection
# enable_health: true          # Enable /health endpoint
# enable_telemetry: true       # Enable /metrics endpoint
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
# enable_file_logging: false   # Also write logs to log_file
# log_file: null               # null = <exe dir>/logs/overlay-resource-governor.log
# log_retention_days: 30       # Daily log files kept, rotated at midnight
"#;

    format!("{comments}\n{yaml}")
}
