//! nfs-stress - Distributed Filesystem Stress Test Coordinator
//!
//! Drives many remote workers that hammer a shared network mount with file
//! operations, and checks every reported outcome against a shadow model of
//! what the namespace should look like.
//!
//! # Features
//!
//! - **Bounded Job Distribution**: Each worker holds at most
//!   `max_jobs_per_worker` outstanding jobs. Jobs of a worker that disconnects,
//!   drops its connection or goes silent are requeued and redelivered first.
//!
//! - **Shadow-State Verification**: Outcomes arrive late, out of order and
//!   from several hosts. The verifier tells benign races apart from real
//!   consistency violations such as a read returning stale content.
//!
//! - **Pluggable Transport**: Newline-delimited JSON over TCP for real runs,
//!   in-process channels for tests and simulation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────┐          ┌──────────┐
//! │ Worker 1 │  │ Worker 2 │   ...    │ Worker N │   (remote hosts, shared mount)
//! └────┬─────┘  └────┬─────┘          └────┬─────┘
//!      │ connect / job_done / disconnect   │
//!      └─────────────┼─────────────────────┘
//!                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Transport                              │
//! │  acceptor + reader thread per connection ──► bounded queue  │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ Inbound { from, frame }
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Controller (single thread)                   │
//! │                                                             │
//! │  JobSource ──► WorkloadPlanner    WorkerRegistry            │
//! │  (requeue,     (reads model)      (outstanding jobs,        │
//! │   counter)                         least-loaded pick)       │
//! │                                                             │
//! │  Verifier ──► Namespace model (arena tree)                  │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ verdicts
//!                               ▼
//!                 tracing events + RunStats (reporter, progress)
//! ```
//!
//! # Example
//!
//! ```bash
//! # Listen for workers on every interface
//! nfs-stress --bind tcp://*:5555 -p
//!
//! # Larger tree, reproducible names and workload, debug log file
//! nfs-stress --depth 2 --width 20 --seed 42 --log-file run.log
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod namespace;
pub mod progress;
pub mod protocol;
pub mod scheduler;
pub mod stats;
pub mod transport;
pub mod verifier;

pub use config::{CliArgs, ControllerConfig, Endpoint};
pub use error::{Result, StressError};
pub use scheduler::{Controller, RunReport, StopSignal};
pub use verifier::{Verdict, Verifier, Violation};
