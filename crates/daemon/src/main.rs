// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden Daemon (wardend)
//!
//! Background process that owns the lock engine and its maintenance loops.

use std::path::PathBuf;
use std::process::ExitCode;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use warden_daemon::{load_config, startup, Args, Daemon, LifecycleError, Mode, Paths};
use warden_engine::CompatibilityChecker;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Parse arguments
    let args = match Args::parse(
        std::env::args().skip(1),
        std::env::var_os("WARDEN_CONFIG").map(PathBuf::from),
    ) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("wardend: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    if args.mode == Mode::Version {
        println!("wardend {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    // Load configuration
    let config = match load_config(args.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wardend: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.mode == Mode::CheckConfig {
        println!(
            "configuration ok (mode: {}, cluster: {})",
            config.locking.compatibility_mode,
            if config.locking.cluster.enabled { "on" } else { "off" }
        );
        return Ok(ExitCode::SUCCESS);
    }

    let paths = Paths::resolve(&config)?;

    // Set up logging
    let _log_guard = setup_logging(&paths)?;

    match &args.config_path {
        Some(path) => info!(config = %path.display(), "starting wardend"),
        None => info!("starting wardend with default configuration"),
    }

    // Start daemon
    let daemon = match startup(config, paths).await {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to start daemon");
            eprintln!("wardend: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.mode == Mode::SelfTest {
        return self_test(daemon).await;
    }

    serve(daemon).await?;
    Ok(ExitCode::SUCCESS)
}

/// Run until a termination signal arrives
async fn serve(daemon: Daemon) -> Result<(), LifecycleError> {
    // Set up signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("daemon ready");

    // Signal ready for parent process (e.g., systemd waiting for startup)
    println!("READY");

    let health_interval = daemon.config.locking.maintenance.health_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(health_interval) => {
                daemon.report_health().await;
            }

            // Graceful shutdown on SIGTERM
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }

            // Graceful shutdown on SIGINT
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    daemon.shutdown().await?;
    info!("daemon stopped");
    Ok(())
}

/// Exercise the assembled adapter with the compatibility checks
async fn self_test(daemon: Daemon) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let checker = CompatibilityChecker::new(daemon.adapter.clone());
    let report = checker.run().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    daemon.shutdown().await?;
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn setup_logging(
    paths: &Paths,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Create log directory if needed
    if let Some(parent) = paths.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Set up file appender
    let file_appender = tracing_appender::rolling::never(
        paths.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        paths.log_path.file_name().ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Set up subscriber with env filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
