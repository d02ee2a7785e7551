//! HTTP endpoint handlers for the diagnostics server.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/stats`: Governor statistics as JSON
//! - `/health`: Plain-text health summary
//! - `/metrics`: Prometheus metrics endpoint
//! - `/optimize`, `/cache/clear`, `/access/{name}`: Administrative actions

pub mod admin;
pub mod health;
pub mod metrics;
pub mod stats;

// Re-export handlers
pub use admin::{access_handler, clear_cache_handler, optimize_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use stats::stats_handler;
