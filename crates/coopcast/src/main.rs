use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use coopcast::daemon::{self, Daemon, WorkerSchedule};
use coopcast::telemetry;
use coopconf::CoopConfig;

/// Motion-triggered coop photos and live broadcasts
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./coopcast.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive (overrides [telemetry] log_level)
    #[arg(long)]
    log_level: Option<String>,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Log posts instead of publishing them
    #[arg(long)]
    dry_run: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = CoopConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.telemetry.log_level = level;
    }
    if let Some(endpoint) = cli.otlp_endpoint {
        config.telemetry.otlp_endpoint = endpoint;
    }

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let otlp = Some(config.telemetry.otlp_endpoint.as_str()).filter(|e| !e.is_empty());
    telemetry::init(&config.telemetry.log_level, otlp).context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::info!("Loaded config: {}", file.display());
    }
    for var in &sources.env_overrides {
        tracing::info!("Config override from env: {}", var);
    }

    config.validate().context("Invalid configuration")?;

    std::fs::create_dir_all(&config.paths.capture_dir).with_context(|| {
        format!(
            "Failed to create capture directory {}",
            config.paths.capture_dir.display()
        )
    })?;

    let coordinator = daemon::build_coordinator(&config, cli.dry_run)?;
    let motion = daemon::open_motion_source(&config).await?;
    let daemon = Daemon::start(coordinator, motion, WorkerSchedule::from_config(&config));

    tracing::info!(
        motion = config.motion.enabled,
        content = config.content.enabled,
        broadcast = config.broadcast.enabled,
        dry_run = cli.dry_run,
        "coopcast running"
    );

    wait_for_signal().await;
    daemon.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM (systemd stops with the latter).
async fn wait_for_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}
