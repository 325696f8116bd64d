//! nfs-stress - Distributed Filesystem Stress Test Coordinator
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use nfs_stress::config::{CliArgs, ControllerConfig};
use nfs_stress::progress::{print_header, print_summary, ProgressReporter};
use nfs_stress::scheduler::{Controller, StopSignal};
use nfs_stress::stats::StatsReporter;
use nfs_stress::transport::tcp::TcpHub;
use nfs_stress::transport::Transport;
use std::fs::File;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Exit code when the run finished but found consistency violations
const EXIT_VIOLATIONS: u8 = 2;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_VIOLATIONS),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns `false` if the run found violations
fn run() -> Result<bool> {
    let args = CliArgs::parse();
    let config = ControllerConfig::from_args(args).context("Invalid configuration")?;

    setup_logging(config.verbose, config.log_file.as_deref())?;

    // Setup signal handler for graceful shutdown
    let stop = StopSignal::new();
    let flag = stop.flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let hub = TcpHub::bind(&config.endpoint).context("Failed to bind coordinator endpoint")?;

    if config.show_progress {
        print_header(&hub.endpoint(), &config);
    }

    let mut controller = Controller::new(config.clone(), hub, stop.clone());

    let reporter = match config.stats_interval {
        Some(interval) => Some(
            StatsReporter::spawn(controller.stats(), interval, stop.clone())
                .context("Failed to start statistics reporter")?,
        ),
        None => None,
    };

    let progress = if config.show_progress {
        Some(
            ProgressReporter::new()
                .spawn(controller.stats(), stop.clone())
                .context("Failed to start progress display")?,
        )
    } else {
        None
    };

    // The controller sets the stop signal on the way out, error or not
    let result = controller.run();

    if let Some(handle) = progress {
        let _ = handle.join();
    }
    if let Some(reporter) = reporter {
        reporter.join();
    }

    let report = result.context("Stress run failed")?;
    report.stats.log(report.duration);
    print_summary(&report);

    if !report.completed {
        info!("Run was interrupted before completion");
    }

    if report.stats.violations > 0 {
        error!(
            violations = report.stats.violations,
            "Consistency violations detected"
        );
        return Ok(false);
    }

    Ok(true)
}

fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose {
        "nfs_stress=debug,warn"
    } else {
        "nfs_stress=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter);

    // The log file always gets debug detail, whatever the console shows
    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file '{}'", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_names(true)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new("nfs_stress=debug,warn")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}
