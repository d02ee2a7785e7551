//! CLI arguments and subcommands for overlay-resource-governor.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "overlay-resource-governor",
    about = "Keeps an overlay's icon cache and memory use in check",
    long_about = "Keeps an overlay's icon cache and memory use in check.\n\n\
                  Bounds the icon cache directory to a size budget with LRU eviction, \
                  samples process memory to spot sustained growth, and throttles manual \
                  collection requests. Exposes stats over a small HTTP diagnostics server.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Diagnostics HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides log_level from the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Print only the loaded user config file + full path and exit
    #[arg(long)]
    pub show_user_config: bool,

    /// Output format for --show-config*
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Icon cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Icon cache budget in KB
    #[arg(long)]
    pub max_cache_kb: Option<u64>,

    /// Memory sampling interval in milliseconds
    #[arg(long)]
    pub monitor_interval_ms: Option<u64>,

    /// Optimization cycle interval in milliseconds
    #[arg(long)]
    pub optimize_interval_ms: Option<u64>,

    /// Minimum time between manual collections in milliseconds
    #[arg(long)]
    pub gc_interval_ms: Option<u64>,

    /// Number of memory samples kept for leak detection
    #[arg(long)]
    pub max_measurements: Option<usize>,

    /// Leak heuristic: half-mean or slope
    #[arg(long)]
    pub leak_strategy: Option<String>,

    /// Never call the allocator trim hook
    #[arg(long)]
    pub disable_gc_hook: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Disable /metrics endpoint
    #[arg(long)]
    pub disable_telemetry: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and host requirements
    Check {
        /// Check the icon cache directory
        #[arg(long)]
        cache: bool,

        /// Check process memory sampling
        #[arg(long)]
        memory: bool,

        /// Check everything
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments
        #[arg(long)]
        commented: bool,
    },

    /// Run one optimization pass against the cache directory and print the result
    Optimize,

    /// Delete every file in the icon cache
    ClearCache,

    /// Print icon cache and memory statistics
    Stats {
        /// Number of memory samples to take before reporting
        #[arg(short = 'n', long, default_value_t = 1)]
        samples: usize,
    },

    /// Fill a directory with synthetic icon files
    GenerateTestdata {
        /// Target directory
        #[arg(short = 'o', long, default_value = "testdata-icons")]
        output: PathBuf,

        /// Number of icon files to create
        #[arg(long, default_value_t = 200)]
        count: usize,

        /// Smallest file size in KB
        #[arg(long, default_value_t = 4)]
        min_kb: u64,

        /// Largest file size in KB
        #[arg(long, default_value_t = 256)]
        max_kb: u64,

        /// Spread modification times over this many past days
        #[arg(long, default_value_t = 30)]
        age_days: u32,
    },
}
