//! Health check endpoint handler.
//!
//! Returns a plain-text summary of the governor: timer state, memory window
//! figures and icon cache usage.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use overlay_resource_governor::{GovernorStats, OptimizerState};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

const MIB: f64 = 1024.0 * 1024.0;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let optimizer_state = state.optimizer.state();
    let stats = state.stats().await;

    let (status, message) = match (optimizer_state, &stats) {
        (_, None) => (StatusCode::INTERNAL_SERVER_ERROR, "Stats unavailable"),
        (OptimizerState::Running, _) => (StatusCode::OK, "OK"),
        (OptimizerState::Stopped, _) => (StatusCode::SERVICE_UNAVAILABLE, "Governor stopped"),
    };

    let mut out = String::new();
    writeln!(out, "{message}").ok();
    writeln!(out).ok();
    writeln!(out, "state:     {:?}", optimizer_state).ok();
    writeln!(out, "cycles:    {}", state.optimizer.cycles()).ok();
    writeln!(out, "gc hook:   {}", state.optimizer.gc_available()).ok();
    writeln!(out, "uptime:    {}s", state.started_at.elapsed().as_secs()).ok();
    writeln!(out, "cache dir: {}", state.config.cache_dir().display()).ok();
    if let Some(stats) = &stats {
        writeln!(out).ok();
        out.push_str(&render_table(stats));
    }

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        out,
    )
}

/// Renders memory and cache figures as a plain-text table (MiB).
fn render_table(stats: &GovernorStats) -> String {
    let mut out = String::new();
    writeln!(out, "MEMORY").ok();
    writeln!(out, "======").ok();
    writeln!(out).ok();

    match &stats.memory {
        Some(mem) => {
            writeln!(
                out,
                "{:12} | {:>10} | {:>10} | {:>10}",
                "figure", "current", "average", "peak"
            )
            .ok();
            writeln!(out, "{}", "-".repeat(50)).ok();
            let rows = [
                ("rss", mem.current.rss, mem.average.rss, mem.peak.rss),
                (
                    "heap_used",
                    mem.current.heap_used,
                    mem.average.heap_used,
                    mem.peak.heap_used,
                ),
                (
                    "heap_total",
                    mem.current.heap_total,
                    mem.average.heap_total,
                    mem.peak.heap_total,
                ),
                (
                    "external",
                    mem.current.external,
                    mem.average.external,
                    mem.peak.external,
                ),
            ];
            for (name, current, average, peak) in rows {
                writeln!(
                    out,
                    "{:12} | {:>10.2} | {:>10.2} | {:>10.2}",
                    name,
                    current as f64 / MIB,
                    average as f64 / MIB,
                    peak as f64 / MIB
                )
                .ok();
            }
            writeln!(out).ok();
            writeln!(out, "samples in window: {}", mem.measurements).ok();
        }
        None => {
            writeln!(out, "no samples yet").ok();
        }
    }

    writeln!(out).ok();
    writeln!(out, "ICON CACHE").ok();
    writeln!(out, "==========").ok();
    writeln!(out).ok();
    let usage = stats.icon_cache;
    let pct = if usage.max_size > 0 {
        usage.size as f64 / usage.max_size as f64 * 100.0
    } else {
        0.0
    };
    writeln!(
        out,
        "{:.2} MiB of {:.2} MiB ({:.1}%)",
        usage.size as f64 / MIB,
        usage.max_size as f64 / MIB,
        pct
    )
    .ok();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_resource_governor::{IconCacheUsage, MemoryFigures, MemorySample, MemoryStats};

    #[test]
    fn test_render_table_without_samples() {
        let table = render_table(&GovernorStats {
            memory: None,
            icon_cache: IconCacheUsage {
                size: 0,
                max_size: 0,
            },
        });
        assert!(table.contains("no samples yet"));
        assert!(table.contains("(0.0%)"));
    }

    #[test]
    fn test_render_table_with_samples() {
        let figures = MemoryFigures {
            heap_used: 1024 * 1024,
            heap_total: 2 * 1024 * 1024,
            external: 0,
            rss: 4 * 1024 * 1024,
        };
        let table = render_table(&GovernorStats {
            memory: Some(MemoryStats {
                current: MemorySample {
                    timestamp: 0,
                    heap_used: figures.heap_used,
                    heap_total: figures.heap_total,
                    external: figures.external,
                    rss: figures.rss,
                },
                average: figures,
                peak: figures,
                measurements: 3,
            }),
            icon_cache: IconCacheUsage {
                size: 512 * 1024,
                max_size: 1024 * 1024,
            },
        });
        assert!(table.contains("samples in window: 3"));
        assert!(table.contains("4.00"));
        assert!(table.contains("(50.0%)"));
    }
}
