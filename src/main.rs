//! overlay-resource-governor
//!
//! Runs the resource governor against an icon cache directory and exposes its
//! state over a small diagnostics HTTP server (`/stats`, `/health`, `/metrics`).

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use overlay_resource_governor::MemoryOptimizer;
use prometheus::Registry;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod config;
mod handlers;
mod metrics;
mod state;

use cli::{Args, Commands};
use config::{
    resolve_config, user_config_path, validate_effective_config, Config, DEFAULT_BIND_ADDR,
    DEFAULT_PORT,
};
use handlers::{
    access_handler, clear_cache_handler, health_handler, metrics_handler, optimize_handler,
    stats_handler,
};
use metrics::GovernorMetrics;
use state::AppState;

fn level_filter(level: &str) -> LevelFilter {
    match level {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Splits a log file path into the rolling appender's directory, prefix and suffix.
fn log_file_parts(path: &Path) -> (PathBuf, String, String) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "overlay-resource-governor".to_string());
    let suffix = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    (dir, prefix, suffix)
}

/// Installs the global subscriber: stderr, plus a daily rolling file when enabled.
///
/// The returned guard flushes the file writer on drop and must outlive the program.
fn setup_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let level = level_filter(config.log_level.as_deref().unwrap_or("info"));

    let (file_layer, guard) = if config.enable_file_logging.unwrap_or(false) {
        let (dir, prefix, suffix) = log_file_parts(&config.log_file());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix(suffix)
            .max_log_files(config.log_retention_days())
            .build(&dir)
            .with_context(|| format!("Failed to open log files in {}", dir.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(level)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to set tracing subscriber")?;

    info!("Logging initialized with level: {}", level);
    if guard.is_some() {
        info!(
            "Writing daily logs next to {} (keeping {} files)",
            config.log_file().display(),
            config.log_retention_days()
        );
    }
    Ok(guard)
}

fn validated_config(args: &Args) -> Result<Config> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Validated config with logging installed, for commands that touch the governor.
fn prepare(args: &Args) -> Result<(Config, Option<WorkerGuard>)> {
    let config = validated_config(args)?;
    let guard = setup_logging(&config)?;
    Ok((config, guard))
}

fn run_command(command: &Commands, args: &Args) -> Result<()> {
    match command {
        Commands::Config {
            output,
            format,
            commented,
        } => commands::command_config(output.clone(), format.clone(), *commented),
        Commands::GenerateTestdata {
            output,
            count,
            min_kb,
            max_kb,
            age_days,
        } => commands::command_generate_testdata(output.clone(), *count, *min_kb, *max_kb, *age_days),
        Commands::Check { cache, memory, all } => {
            let (config, _guard) = prepare(args)?;
            commands::command_check(*cache, *memory, *all, &config)
        }
        Commands::Optimize => {
            let (config, _guard) = prepare(args)?;
            commands::command_optimize(&config)
        }
        Commands::ClearCache => {
            let (config, _guard) = prepare(args)?;
            commands::command_clear_cache(&config)
        }
        Commands::Stats { samples } => {
            let (config, _guard) = prepare(args)?;
            commands::command_stats(*samples, &config)
        }
    }
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.show_user_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        if args.show_user_config {
            let source = if args.no_config {
                None
            } else {
                user_config_path(args.config.as_deref())
            };
            return commands::show_config(&config, args.config_format.clone(), source);
        }

        return commands::show_config(&config, args.config_format.clone(), None);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return run_command(command, &args);
    }

    // Load configuration for main server mode; the guard flushes file logs on exit
    let (config, _log_guard) = prepare(&args)?;

    info!("Starting overlay-resource-governor");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    let settings = config.optimizer_settings()?;
    info!(
        "Icon cache: {} (budget {} KB)",
        settings.cache_dir.display(),
        settings.max_cache_bytes / 1024
    );

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    let metrics = Arc::new(GovernorMetrics::new(&registry)?);
    debug!("Prometheus registry initialized");

    let optimizer = Arc::new(MemoryOptimizer::new(settings));
    optimizer.set_cycle_listener(metrics.clone());
    optimizer.start();

    let state = Arc::new(AppState {
        optimizer: optimizer.clone(),
        registry,
        metrics,
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    });

    // Configure HTTP server routes and start listening
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_ip_str, port))?;

    let mut app = Router::new()
        .route("/stats", get(stats_handler))
        .route("/optimize", post(optimize_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .route("/access/{name}", post(access_handler));

    if config.enable_telemetry.unwrap_or(true) {
        app = app.route("/metrics", get(metrics_handler));
    }
    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        "overlay-resource-governor listening on http://{}:{}",
        bind_ip_str, port
    );

    let server = axum::serve(listener, app);

    let outcome = tokio::select! {
        result = server => result.map_err(|e| {
            error!("Server error: {}", e);
            anyhow::Error::from(e)
        }),
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting...");
            Ok(())
        }
    };

    optimizer.stop();
    info!("overlay-resource-governor stopped gracefully");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_parts_split_path() {
        let (dir, prefix, suffix) = log_file_parts(Path::new("/var/log/gov/governor.log"));
        assert_eq!(dir, PathBuf::from("/var/log/gov"));
        assert_eq!(prefix, "governor");
        assert_eq!(suffix, "log");
    }

    #[test]
    fn test_log_file_parts_defaults() {
        let (dir, prefix, suffix) = log_file_parts(Path::new("governor"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(prefix, "governor");
        assert_eq!(suffix, "log");
    }

    #[test]
    fn test_level_filter_falls_back_to_info() {
        assert_eq!(level_filter("debug"), LevelFilter::DEBUG);
        assert_eq!(level_filter("verbose"), LevelFilter::INFO);
    }
}
