//! Run statistics
//!
//! Counters are plain atomics so the reporter thread and the progress
//! display can read them while the scheduler loop writes.

use crate::protocol::{Action, Outcome};
use crate::scheduler::StopSignal;
use crate::verifier::Verdict;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

const ACTION_COUNT: usize = Action::ALL.len();

/// Shared counters for one run
#[derive(Debug, Default)]
pub struct RunStats {
    pub jobs_dispatched: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_requeued: AtomicU64,
    pub workers_connected: AtomicU64,
    pub workers_lost: AtomicU64,
    pub workers_reaped: AtomicU64,

    /// Successful outcomes per action
    pub succeeded: [AtomicU64; ACTION_COUNT],

    /// Failed outcomes per action
    pub failed: [AtomicU64; ACTION_COUNT],

    pub committed: AtomicU64,
    pub stale: AtomicU64,
    pub tolerated: AtomicU64,
    pub corrected: AtomicU64,
    pub retired: AtomicU64,
    pub violations: AtomicU64,

    /// Results reported as plain strings, counted but not verified
    pub unverified: AtomicU64,

    /// Outcome-shaped results that failed to decode
    pub malformed: AtomicU64,

    /// `job_done` for an unknown worker or job
    pub dropped: AtomicU64,

    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,

    /// Gauges refreshed by the scheduler loop
    pub active_workers: AtomicU64,
    pub active_dirs: AtomicU64,
    pub synced_dirs: AtomicU64,
    pub files_on_disk: AtomicU64,
}

impl RunStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        Self::bump(&self.jobs_dispatched);
    }

    pub fn record_requeued(&self, jobs: usize) {
        self.jobs_requeued.fetch_add(jobs as u64, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        Self::bump(&self.workers_connected);
    }

    pub fn record_lost(&self) {
        Self::bump(&self.workers_lost);
    }

    pub fn record_reaped(&self) {
        Self::bump(&self.workers_reaped);
    }

    pub fn record_unverified(&self) {
        Self::bump(&self.jobs_completed);
        Self::bump(&self.unverified);
    }

    pub fn record_malformed(&self) {
        Self::bump(&self.jobs_completed);
        Self::bump(&self.malformed);
    }

    pub fn record_dropped(&self) {
        Self::bump(&self.dropped);
    }

    /// Count a verified outcome and its verdict
    pub fn record_outcome(&self, outcome: &Outcome, verdict: &Verdict) {
        Self::bump(&self.jobs_completed);

        let idx = outcome.action.index();
        if outcome.is_success() {
            Self::bump(&self.succeeded[idx]);
            let bytes = outcome.data.chunk_size.unwrap_or(0);
            match outcome.action {
                Action::Read => {
                    self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
                }
                Action::Write => {
                    self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                }
                _ => {}
            }
        } else {
            Self::bump(&self.failed[idx]);
        }

        let counter = match verdict {
            Verdict::Committed => &self.committed,
            Verdict::Stale => &self.stale,
            Verdict::Tolerated { .. } => &self.tolerated,
            Verdict::Corrected => &self.corrected,
            Verdict::Retired { .. } => &self.retired,
            Verdict::Violation(_) => &self.violations,
        };
        Self::bump(counter);
    }

    pub fn set_workers(&self, count: usize) {
        self.active_workers.store(count as u64, Ordering::Relaxed);
    }

    pub fn set_namespace(&self, active_dirs: usize, synced_dirs: usize, files_on_disk: usize) {
        self.active_dirs.store(active_dirs as u64, Ordering::Relaxed);
        self.synced_dirs.store(synced_dirs as u64, Ordering::Relaxed);
        self.files_on_disk.store(files_on_disk as u64, Ordering::Relaxed);
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            jobs_dispatched: load(&self.jobs_dispatched),
            jobs_completed: load(&self.jobs_completed),
            jobs_requeued: load(&self.jobs_requeued),
            workers_connected: load(&self.workers_connected),
            workers_lost: load(&self.workers_lost),
            workers_reaped: load(&self.workers_reaped),
            succeeded: std::array::from_fn(|i| load(&self.succeeded[i])),
            failed: std::array::from_fn(|i| load(&self.failed[i])),
            committed: load(&self.committed),
            stale: load(&self.stale),
            tolerated: load(&self.tolerated),
            corrected: load(&self.corrected),
            retired: load(&self.retired),
            violations: load(&self.violations),
            unverified: load(&self.unverified),
            malformed: load(&self.malformed),
            dropped: load(&self.dropped),
            bytes_read: load(&self.bytes_read),
            bytes_written: load(&self.bytes_written),
            active_workers: load(&self.active_workers),
            active_dirs: load(&self.active_dirs),
            synced_dirs: load(&self.synced_dirs),
            files_on_disk: load(&self.files_on_disk),
        }
    }
}

/// Plain copy of [`RunStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_requeued: u64,
    pub workers_connected: u64,
    pub workers_lost: u64,
    pub workers_reaped: u64,
    pub succeeded: [u64; ACTION_COUNT],
    pub failed: [u64; ACTION_COUNT],
    pub committed: u64,
    pub stale: u64,
    pub tolerated: u64,
    pub corrected: u64,
    pub retired: u64,
    pub violations: u64,
    pub unverified: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub active_workers: u64,
    pub active_dirs: u64,
    pub synced_dirs: u64,
    pub files_on_disk: u64,
}

impl StatsSnapshot {
    pub fn succeeded(&self, action: Action) -> u64 {
        self.succeeded[action.index()]
    }

    pub fn failed(&self, action: Action) -> u64 {
        self.failed[action.index()]
    }

    /// Completed jobs per second over `elapsed`
    pub fn jobs_per_second(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.jobs_completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Log the snapshot as one structured block
    pub fn log(&self, elapsed: Duration) {
        info!(
            elapsed_secs = elapsed.as_secs(),
            dispatched = self.jobs_dispatched,
            completed = self.jobs_completed,
            requeued = self.jobs_requeued,
            rate = format!("{:.1}/s", self.jobs_per_second(elapsed)),
            workers = self.active_workers,
            workers_lost = self.workers_lost,
            "Run statistics"
        );
        info!(
            active_dirs = self.active_dirs,
            synced_dirs = self.synced_dirs,
            files_on_disk = self.files_on_disk,
            bytes_read = self.bytes_read,
            bytes_written = self.bytes_written,
            "Namespace statistics"
        );
        info!(
            committed = self.committed,
            stale = self.stale,
            tolerated = self.tolerated,
            corrected = self.corrected,
            retired = self.retired,
            violations = self.violations,
            unverified = self.unverified,
            malformed = self.malformed,
            "Verdict statistics"
        );
        for action in Action::ALL {
            let (ok, failed) = (self.succeeded(action), self.failed(action));
            if ok + failed > 0 {
                info!(action = %action, succeeded = ok, failed = failed, "Action statistics");
            }
        }
    }
}

/// Background thread logging statistics at a fixed interval
pub struct StatsReporter {
    handle: JoinHandle<()>,
}

impl StatsReporter {
    /// How often the reporter checks the stop signal
    const POLL: Duration = Duration::from_millis(100);

    pub fn spawn(
        stats: Arc<RunStats>,
        interval: Duration,
        stop: StopSignal,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("stats-reporter".into())
            .spawn(move || {
                let start = Instant::now();
                let mut next = start + interval;
                while !stop.is_stopped() {
                    thread::sleep(Self::POLL.min(interval));
                    if Instant::now() >= next {
                        stats.snapshot().log(start.elapsed());
                        next += interval;
                    }
                }
            })?;
        Ok(Self { handle })
    }

    /// Wait for the reporter to notice the stop signal
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_timestamp, ErrorCode, OutcomeData};
    use crate::verifier::Violation;

    fn ts() -> chrono::NaiveDateTime {
        parse_timestamp("2024/01/01 00:00:00.000000").unwrap()
    }

    #[test]
    fn test_record_outcomes() {
        let stats = RunStats::new();

        let data = OutcomeData {
            chunk_size: Some(4096),
            ..Default::default()
        };
        let write = Outcome::success(Action::Write, "/d/f", ts(), data.clone());
        stats.record_outcome(&write, &Verdict::Committed);
        let read = Outcome::success(Action::Read, "/d/f", ts(), data);
        stats.record_outcome(
            &read,
            &Verdict::Violation(Violation::LostContext {
                action: Action::Read,
                target: "/".into(),
                code: "x".into(),
                message: String::new(),
            }),
        );
        let failed = Outcome::failure(Action::Stat, "/d/f", ts(), ErrorCode::NoTarget, "gone");
        stats.record_outcome(
            &failed,
            &Verdict::Tolerated {
                code: ErrorCode::NoTarget,
            },
        );
        stats.record_unverified();
        stats.record_malformed();

        let snap = stats.snapshot();
        assert_eq!(snap.jobs_completed, 5);
        assert_eq!(snap.succeeded(Action::Write), 1);
        assert_eq!(snap.failed(Action::Stat), 1);
        assert_eq!(snap.bytes_written, 4096);
        assert_eq!(snap.bytes_read, 4096);
        assert_eq!(snap.violations, 1);
        assert_eq!(snap.tolerated, 1);
        assert_eq!(snap.unverified, 1);
        assert_eq!(snap.malformed, 1);
        assert_eq!(stats.violations(), 1);
    }

    #[test]
    fn test_jobs_per_second() {
        let snap = StatsSnapshot {
            jobs_completed: 1000,
            ..Default::default()
        };
        assert!((snap.jobs_per_second(Duration::from_secs(10)) - 100.0).abs() < 0.1);
        assert_eq!(snap.jobs_per_second(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_reporter_stops() {
        let stop = StopSignal::new();
        let reporter =
            StatsReporter::spawn(RunStats::new(), Duration::from_millis(10), stop.clone()).unwrap();
        thread::sleep(Duration::from_millis(30));
        stop.stop();
        reporter.join();
    }
}
