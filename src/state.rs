//! Application state shared by the HTTP handlers.

use overlay_resource_governor::{GovernorStats, MemoryOptimizer};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use crate::config::Config;
use crate::metrics::GovernorMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

pub struct AppState {
    /// The process-wide governor; owned here, stopped by `main` on shutdown.
    pub optimizer: Arc<MemoryOptimizer>,
    pub registry: Registry,
    pub metrics: Arc<GovernorMetrics>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    /// Governor stats gathered on the blocking pool, since they stat every cached file.
    pub async fn stats(&self) -> Option<GovernorStats> {
        let optimizer = self.optimizer.clone();
        match tokio::task::spawn_blocking(move || optimizer.get_stats()).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Stats task failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stats_reads_cache_usage_off_the_runtime() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.ico"), vec![0u8; 2048]).unwrap();
        let config = Config {
            cache_dir: Some(tmp.path().to_path_buf()),
            max_cache_kb: Some(4),
            ..Config::default()
        };
        let registry = Registry::new();
        let state = AppState {
            optimizer: Arc::new(MemoryOptimizer::new(config.optimizer_settings().unwrap())),
            metrics: Arc::new(GovernorMetrics::new(&registry).unwrap()),
            registry,
            config: Arc::new(config),
            started_at: Instant::now(),
        };

        let stats = state.stats().await.unwrap();
        assert_eq!(stats.icon_cache.size, 2048);
        assert_eq!(stats.icon_cache.max_size, 4096);
    }
}
