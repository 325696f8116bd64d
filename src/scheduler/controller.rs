//! Scheduler loop
//!
//! The controller owns every piece of scheduler state: the worker registry,
//! the job source, the workload planner and the verifier (and through it the
//! namespace model). It runs on a single thread; the transport's reader
//! threads only feed it frames.
//!
//! Each iteration waits for a worker with spare capacity, takes the next job
//! from the source and dispatches it:
//!
//! ```text
//! AwaitWorker ──► AcquireJob ──► Dispatch ──┐
//!  (drain inbound,                          │
//!   reap silent workers,                    │
//!   bounded wait)                           │
//!     ▲                                     │
//!     └─────────────────────────────────────┘
//! ```
//!
//! The loop ends when the source is exhausted or the stop signal is set. It
//! does not wait for jobs still in flight.

use crate::config::ControllerConfig;
use crate::error::{Result, TransportError};
use crate::namespace::Namespace;
use crate::protocol::{JobResult, WorkerId, WorkerMessage};
use crate::scheduler::registry::{Completion, WorkerRegistry};
use crate::scheduler::source::{Job, JobSource};
use crate::scheduler::workload::WorkloadPlanner;
use crate::scheduler::StopSignal;
use crate::stats::{RunStats, StatsSnapshot};
use crate::transport::{Inbound, Transport};
use crate::verifier::Verifier;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often namespace gauges are refreshed
const GAUGE_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Whether the job source was exhausted (vs. stopped)
    pub completed: bool,

    /// Wall time of the run
    pub duration: Duration,

    /// Jobs still outstanding on workers when the loop ended
    pub in_flight: usize,

    /// Jobs waiting in the requeue buffer when the loop ended
    pub pending_requeue: usize,

    /// Final counters
    pub stats: StatsSnapshot,
}

/// Why a worker left the registry
#[derive(Debug, Clone, Copy)]
enum Departure {
    Disconnect,
    ConnectionClosed,
    SendFailed,
    TimedOut,
}

impl Departure {
    fn as_str(&self) -> &'static str {
        match self {
            Departure::Disconnect => "disconnect",
            Departure::ConnectionClosed => "connection closed",
            Departure::SendFailed => "send failed",
            Departure::TimedOut => "timed out",
        }
    }
}

/// Coordinates job distribution and outcome verification
pub struct Controller<T: Transport> {
    config: ControllerConfig,
    transport: T,
    registry: WorkerRegistry,
    source: JobSource,
    planner: WorkloadPlanner,
    verifier: Verifier,
    stats: Arc<RunStats>,
    stop: StopSignal,
    gauges_updated: Option<Instant>,
}

impl<T: Transport> Controller<T> {
    /// Create a controller and build the initial namespace tree
    pub fn new(config: ControllerConfig, transport: T, stop: StopSignal) -> Self {
        info!(
            dirs = config.tree.dir_count(),
            files_per_dir = config.tree.files_per_dir,
            "Building directory tree"
        );
        let namespace = Namespace::build(config.tree, config.seed);
        debug!(namespace = ?namespace, "Directory tree ready");

        let planner = WorkloadPlanner::new(config.seed.map(|s| s.wrapping_add(1)));

        Self {
            registry: WorkerRegistry::new(config.max_jobs_per_worker),
            source: JobSource::new(config.max_jobs),
            planner,
            verifier: Verifier::new(namespace).with_dir_limit(config.max_dir_size),
            stats: RunStats::new(),
            transport,
            stop,
            config,
            gauges_updated: None,
        }
    }

    /// Shared statistics (for the reporter and progress display)
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn namespace(&self) -> &Namespace {
        self.verifier.namespace()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn source(&self) -> &JobSource {
        &self.source
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the scheduler loop
    ///
    /// Returns an error only for protocol violations and transport failures
    /// that are not scoped to a single worker.
    pub fn run(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        info!(
            endpoint = %self.transport.endpoint(),
            max_jobs = self.config.max_jobs,
            max_jobs_per_worker = self.config.max_jobs_per_worker,
            "Starting stress run"
        );

        let result = self.schedule();

        // Collaborators watch the same signal
        self.stop.stop();
        self.refresh_gauges(true);

        let completed = result?;
        let report = RunReport {
            completed,
            duration: start.elapsed(),
            in_flight: self.registry.total_outstanding(),
            pending_requeue: self.source.pending_requeue(),
            stats: self.stats.snapshot(),
        };

        info!(
            completed = report.completed,
            dispatched = report.stats.jobs_dispatched,
            verified = report.stats.jobs_completed,
            in_flight = report.in_flight,
            violations = report.stats.violations,
            duration_secs = report.duration.as_secs(),
            "Stress run finished"
        );
        Ok(report)
    }

    /// AwaitWorker, AcquireJob, Dispatch until exhausted or stopped
    ///
    /// Returns `true` if the source ran dry.
    fn schedule(&mut self) -> Result<bool> {
        loop {
            if self.source.is_exhausted() {
                return Ok(true);
            }

            let Some(worker) = self.await_worker()? else {
                info!("Stop requested while waiting for a worker");
                return Ok(false);
            };

            // Taken only once a worker is free, so jobs requeued during the
            // wait go out first and new work is planned against the latest model
            let Some(job) = self.acquire_job() else {
                return Ok(true);
            };

            self.dispatch(worker, job)?;

            if self.stop.is_stopped() {
                info!("Stop requested");
                return Ok(false);
            }
        }
    }

    fn acquire_job(&mut self) -> Option<Job> {
        let planner = &mut self.planner;
        let namespace = self.verifier.namespace();
        self.source.next_job(|_| planner.plan(namespace))
    }

    /// Wait for a worker with spare capacity
    ///
    /// Returns `None` when the stop signal is set before one becomes free.
    fn await_worker(&mut self) -> Result<Option<WorkerId>> {
        loop {
            self.drain()?;
            self.reap_expired();
            self.refresh_gauges(false);

            if let Some(worker) = self.registry.select_worker() {
                return Ok(Some(worker));
            }
            if self.stop.is_stopped() {
                return Ok(None);
            }

            if let Some(event) = self.transport.recv_timeout(self.config.backoff)? {
                self.handle_inbound(event)?;
            }
        }
    }

    /// Handle every inbound event already queued
    fn drain(&mut self) -> Result<()> {
        while let Some(event) = self.transport.try_recv()? {
            self.handle_inbound(event)?;
        }
        Ok(())
    }

    fn handle_inbound(&mut self, event: Inbound) -> Result<()> {
        match event {
            Inbound::Frame { from, payload } => {
                self.registry.touch(&from, Instant::now());
                let message = WorkerMessage::decode(&from, &payload)?;
                self.handle_message(&from, message)
            }
            Inbound::Closed { from } => {
                self.remove_worker(&from, Departure::ConnectionClosed);
                Ok(())
            }
        }
    }

    fn handle_message(&mut self, worker: &WorkerId, message: WorkerMessage) -> Result<()> {
        match message {
            WorkerMessage::Connect => {
                self.registry.register_worker(worker, Instant::now())?;
                self.stats.record_connect();
                self.stats.set_workers(self.registry.worker_count());
                info!(worker = %worker, workers = self.registry.worker_count(), "Worker connected");
            }
            WorkerMessage::Disconnect => {
                if self.remove_worker(worker, Departure::Disconnect).is_none() {
                    warn!(worker = %worker, "Disconnect from unregistered worker");
                }
            }
            WorkerMessage::JobDone { job_id, result } => match self.registry.complete(worker, &job_id) {
                Completion::Completed(job) => self.process_result(worker, job, result),
                Completion::UnknownWorker => {
                    warn!(worker = %worker, job = %job_id, "Job done from unregistered worker, dropping");
                    self.stats.record_dropped();
                }
                Completion::UnknownJob => {
                    warn!(worker = %worker, job = %job_id, "Job done for a job the worker does not hold, dropping");
                    self.stats.record_dropped();
                }
            },
        }
        Ok(())
    }

    fn process_result(&mut self, worker: &WorkerId, job: Job, result: JobResult) {
        match result {
            JobResult::Outcome(outcome) => {
                if outcome.action != job.work.action {
                    debug!(
                        job = %job.id,
                        sent = %job.work.action,
                        reported = %outcome.action,
                        "Outcome action differs from the assigned one"
                    );
                }
                let verdict = self.verifier.apply(&outcome);
                self.stats.record_outcome(&outcome, &verdict);
            }
            JobResult::Text(text) => {
                info!(worker = %worker, job = %job.id, result = %text, "Job finished");
                self.stats.record_unverified();
            }
            JobResult::Raw(ref value) => match result.outcome_error() {
                Some(reason) => {
                    warn!(worker = %worker, job = %job.id, error = %reason, "Malformed outcome");
                    self.stats.record_malformed();
                }
                None => {
                    info!(worker = %worker, job = %job.id, result = %value, "Job finished");
                    self.stats.record_unverified();
                }
            },
        }
    }

    /// Unregister a worker and requeue its outstanding jobs
    ///
    /// Returns the number of requeued jobs, or `None` if the worker was not
    /// registered.
    fn remove_worker(&mut self, worker: &WorkerId, why: Departure) -> Option<usize> {
        let Some(jobs) = self.registry.unregister_worker(worker) else {
            debug!(worker = %worker, reason = why.as_str(), "Worker already gone");
            return None;
        };
        let requeued = self.source.requeue(jobs);
        self.stats.record_requeued(requeued);
        self.stats.set_workers(self.registry.worker_count());
        if !matches!(why, Departure::Disconnect) {
            self.stats.record_lost();
        }
        info!(
            worker = %worker,
            reason = why.as_str(),
            requeued = requeued,
            "Worker disconnected"
        );
        Some(requeued)
    }

    /// Treat busy workers that went silent as disconnected
    fn reap_expired(&mut self) {
        let Some(timeout) = self.config.worker_timeout else {
            return;
        };
        for worker in self.registry.expired(Instant::now(), timeout) {
            warn!(
                worker = %worker,
                outstanding = self.registry.outstanding(&worker),
                timeout_secs = timeout.as_secs(),
                "Worker silent too long, requeueing its jobs"
            );
            self.stats.record_reaped();
            self.remove_worker(&worker, Departure::TimedOut);
        }
    }

    fn dispatch(&mut self, worker: WorkerId, job: Job) -> Result<()> {
        let frame = serde_json::to_vec(&(&job.id, &job.work)).map_err(TransportError::from)?;
        debug!(
            job = %job.id,
            worker = %worker,
            action = %job.work.action,
            target = %job.work.target,
            "Sending job"
        );

        if let Err(job) = self.registry.assign(&worker, job) {
            self.source.requeue(std::iter::once(job));
            return Ok(());
        }

        match self.transport.send(&worker, &frame) {
            Ok(()) => {
                self.stats.record_dispatch();
                Ok(())
            }
            Err(e) if e.is_peer_scoped() => {
                warn!(worker = %worker, error = %e, "Send failed, dropping worker");
                self.remove_worker(&worker, Departure::SendFailed);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn refresh_gauges(&mut self, force: bool) {
        let now = Instant::now();
        let due = self
            .gauges_updated
            .map_or(true, |at| now.duration_since(at) >= GAUGE_INTERVAL);
        if !(force || due) {
            return;
        }
        let ns = self.verifier.namespace();
        self.stats
            .set_namespace(ns.active().len(), ns.synced().len(), ns.files_on_disk());
        self.gauges_updated = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WorkerSession;
    use crate::error::{ProtocolError, StressError};
    use crate::namespace::TreeShape;
    use crate::protocol::{Assignment, JobId};
    use crate::transport::memory::{MemoryHub, MemoryPeer};
    use std::collections::HashSet;
    use std::thread;

    fn config(max_jobs: u64, cap: usize) -> ControllerConfig {
        ControllerConfig {
            tree: TreeShape {
                depth: 0,
                width: 2,
                files_per_dir: 4,
            },
            max_jobs,
            max_jobs_per_worker: cap,
            backoff: Duration::from_millis(10),
            seed: Some(11),
            ..Default::default()
        }
    }

    fn connect(hub: &MemoryHub, name: &str) -> WorkerSession<MemoryPeer> {
        let id = WorkerId::from(name);
        WorkerSession::start(id.clone(), hub.connector().connect(id)).unwrap()
    }

    fn assignments(session: &mut WorkerSession<MemoryPeer>) -> Vec<Assignment> {
        std::iter::from_fn(|| session.next_assignment(Duration::from_millis(10)).unwrap()).collect()
    }

    #[test]
    fn test_dispatches_until_exhausted() {
        let hub = MemoryHub::new();
        let mut worker = connect(&hub, "client01:0x1");

        let mut controller = Controller::new(config(3, 50), hub, StopSignal::new());
        let report = controller.run().unwrap();

        assert!(report.completed);
        assert_eq!(report.stats.jobs_dispatched, 3);
        assert_eq!(report.in_flight, 3);
        assert!(controller.stop_signal().is_stopped());

        let received = assignments(&mut worker);
        assert_eq!(received.len(), 3);
        // Two directories: both mkdirs go out before anything else
        assert!(received[..2]
            .iter()
            .all(|Assignment(_, work)| work.action == crate::protocol::Action::Mkdir));
    }

    #[test]
    fn test_stop_while_waiting_respects_cap() {
        let hub = MemoryHub::new();
        let mut worker = connect(&hub, "client01:0x2");

        let stop = StopSignal::new();
        let mut controller = Controller::new(config(10, 2), hub, stop.clone());
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.stop();
        });
        let report = controller.run().unwrap();
        stopper.join().unwrap();

        assert!(!report.completed);
        assert_eq!(report.stats.jobs_dispatched, 2);
        assert_eq!(report.in_flight, 2);
        assert_eq!(report.pending_requeue, 0);
        assert_eq!(controller.source().minted(), 2);
        assert_eq!(assignments(&mut worker).len(), 2);

        let outstanding: HashSet<&JobId> = controller.registry().outstanding_ids().collect();
        assert!(controller
            .source()
            .requeued_ids()
            .all(|id| !outstanding.contains(id)));
    }

    #[test]
    fn test_duplicate_connect_is_fatal() {
        let hub = MemoryHub::new();
        let mut worker = connect(&hub, "client01:0x3");
        worker.send_raw(br#"{"message": "connect"}"#).unwrap();

        let mut controller = Controller::new(config(5, 50), hub, StopSignal::new());
        let err = controller.run().unwrap_err();
        assert!(matches!(
            err,
            StressError::Protocol(ProtocolError::DuplicateConnect(_))
        ));
        assert_eq!(controller.registry().worker_count(), 1);
    }

    #[test]
    fn test_unknown_message_is_fatal() {
        let hub = MemoryHub::new();
        let mut worker = connect(&hub, "client01:0x4");
        worker.send_raw(br#"{"message": "reboot"}"#).unwrap();

        let mut controller = Controller::new(config(5, 50), hub, StopSignal::new());
        assert!(matches!(
            controller.run(),
            Err(StressError::Protocol(ProtocolError::UnknownMessage { .. }))
        ));
    }

    #[test]
    fn test_unknown_job_is_dropped() {
        let hub = MemoryHub::new();
        let mut worker = connect(&hub, "client01:0x5");
        worker
            .job_done(JobId::from("nope"), JobResult::Text("success".into()))
            .unwrap();

        let mut controller = Controller::new(config(1, 50), hub, StopSignal::new());
        let report = controller.run().unwrap();
        assert_eq!(report.stats.dropped, 1);
        assert_eq!(report.stats.jobs_completed, 0);
        assert_eq!(report.stats.jobs_dispatched, 1);
    }

    #[test]
    fn test_disconnect_requeues_outstanding() {
        let hub = MemoryHub::new();
        let connector = hub.connector();
        let id = WorkerId::from("client01:0x6");
        let mut first = WorkerSession::start(id.clone(), connector.connect(id)).unwrap();

        let stop = StopSignal::new();
        let mut controller = Controller::new(config(6, 3), hub, stop.clone());

        let helper = thread::spawn(move || {
            // First worker takes three jobs and leaves without finishing them
            let mut taken = Vec::new();
            while taken.len() < 3 {
                if let Some(Assignment(job_id, _)) =
                    first.next_assignment(Duration::from_millis(50)).unwrap()
                {
                    taken.push(job_id);
                }
            }
            drop(first.disconnect().unwrap());

            let id = WorkerId::from("client02:0x7");
            let mut second = WorkerSession::start(id.clone(), connector.connect(id)).unwrap();
            let mut redelivered = Vec::new();
            while redelivered.len() < 3 {
                if let Some(Assignment(job_id, _)) =
                    second.next_assignment(Duration::from_millis(50)).unwrap()
                {
                    redelivered.push(job_id);
                }
            }
            stop.stop();
            (taken, redelivered, second)
        });

        let report = controller.run().unwrap();
        let (taken, redelivered, _second) = helper.join().unwrap();

        // Requeued jobs come back before anything new, most recent first
        let mut expected = taken.clone();
        expected.reverse();
        assert_eq!(redelivered, expected);
        assert_eq!(report.stats.jobs_requeued, 3);
        assert!(controller.registry().outstanding(&WorkerId::from("client02:0x7")) <= 3);
    }
}
