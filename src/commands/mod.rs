//! CLI command implementations for overlay-resource-governor.
//!
//! This module provides implementations for all CLI subcommands:
//! - `check`: Host and configuration validation
//! - `config`: Configuration file generation
//! - `optimize` / `clear-cache` / `stats`: One-shot governor operations
//! - `generate-testdata`: Synthetic icon cache generation

pub mod check;
pub mod config;
pub mod generate;
pub mod maintenance;

// Re-export command functions
pub use check::command_check;
pub use config::{command_config, show_config};
pub use generate::command_generate_testdata;
pub use maintenance::{command_clear_cache, command_optimize, command_stats};
