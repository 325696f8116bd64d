//! Progress reporting for the stress run
//!
//! Provides a live spinner fed from [`RunStats`] plus the header and summary
//! printed around a run.

use crate::config::ControllerConfig;
use crate::protocol::Action;
use crate::scheduler::{RunReport, StopSignal};
use crate::stats::{RunStats, StatsSnapshot};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Spinner refresh interval
const REFRESH: Duration = Duration::from_millis(250);

/// Progress reporter that displays run status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, snap: &StatsSnapshot, elapsed: Duration) {
        let mut msg = format!(
            "Jobs: {} sent, {} done | Rate: {:.0}/s | Workers: {} | Dirs: {}/{} | Files: {}",
            format_number(snap.jobs_dispatched),
            format_number(snap.jobs_completed),
            snap.jobs_per_second(elapsed),
            snap.active_workers,
            snap.synced_dirs,
            snap.active_dirs,
            format_number(snap.files_on_disk),
        );
        if snap.violations > 0 {
            msg.push_str(&format!(
                " | {}",
                style(format!("Violations: {}", snap.violations)).red().bold()
            ));
        }
        self.bar.set_message(msg);
    }

    /// Refresh from `stats` on a background thread until `stop` is set
    pub fn spawn(
        self,
        stats: Arc<RunStats>,
        stop: StopSignal,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("progress".into())
            .spawn(move || {
                let start = Instant::now();
                while !stop.is_stopped() {
                    self.update(&stats.snapshot(), start.elapsed());
                    thread::sleep(REFRESH);
                }
                self.finish_and_clear();
            })
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print a header at the start of the run
pub fn print_header(endpoint: &str, config: &ControllerConfig) {
    println!();
    println!(
        "{} {}",
        style("nfs-stress").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Endpoint:").bold(), endpoint);
    println!(
        "  {} {} dirs x {} files (depth {}, width {})",
        style("Tree:").bold(),
        format_number(config.tree.dir_count() as u64),
        format_number(config.tree.files_per_dir as u64),
        config.tree.depth,
        config.tree.width
    );
    println!(
        "  {} {} ({} per worker)",
        style("Jobs:").bold(),
        format_number(config.max_jobs),
        config.max_jobs_per_worker
    );
    if let Some(seed) = config.seed {
        println!("  {} {}", style("Seed:").bold(), seed);
    }
    println!();
}

/// Print a summary of the run
pub fn print_summary(report: &RunReport) {
    let snap = &report.stats;
    let duration_secs = report.duration.as_secs_f64();

    println!();
    if !report.completed {
        println!("{}", style("Run Interrupted").yellow().bold());
    } else if snap.violations > 0 {
        println!("{}", style("Run Complete (violations found)").red().bold());
    } else {
        println!("{}", style("Run Complete").green().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} dispatched, {} verified, {} unverified, {} malformed",
        style("Jobs:").bold(),
        format_number(snap.jobs_dispatched),
        format_number(
            snap.jobs_completed
                .saturating_sub(snap.unverified)
                .saturating_sub(snap.malformed)
        ),
        format_number(snap.unverified),
        format_number(snap.malformed)
    );
    println!(
        "  {} {} in flight, {} requeued",
        style("Pending:").bold(),
        format_number(report.in_flight as u64),
        format_number(snap.jobs_requeued)
    );
    println!(
        "  {} {} connected, {} lost",
        style("Workers:").bold(),
        format_number(snap.workers_connected),
        format_number(snap.workers_lost)
    );
    println!(
        "  {} {} read, {} written",
        style("Data:").bold(),
        format_size(snap.bytes_read, BINARY),
        format_size(snap.bytes_written, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.0} jobs/sec)",
        style("Duration:").bold(),
        duration_secs,
        snap.jobs_per_second(report.duration)
    );
    println!(
        "  {} {} committed, {} tolerated, {} corrected, {} retired, {} stale",
        style("Verdicts:").bold(),
        format_number(snap.committed),
        format_number(snap.tolerated),
        format_number(snap.corrected),
        format_number(snap.retired),
        format_number(snap.stale)
    );
    for action in Action::ALL {
        let (ok, failed) = (snap.succeeded(action), snap.failed(action));
        if ok + failed > 0 {
            println!(
                "    {:<14} {:>10} ok {:>10} failed",
                action.as_str(),
                format_number(ok),
                format_number(failed)
            );
        }
    }
    if snap.violations > 0 {
        println!(
            "  {} {}",
            style("Violations:").red().bold(),
            format_number(snap.violations)
        );
    }
    if snap.dropped > 0 {
        println!(
            "  {} {}",
            style("Dropped results:").yellow().bold(),
            format_number(snap.dropped)
        );
    }
    println!();
}
