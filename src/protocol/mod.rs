//! Wire protocol between the coordinator and its workers
//!
//! Two message families cross the wire:
//!
//! - **Control messages** (`messages`): `connect`, `disconnect` and
//!   `job_done` from workers, `[job_id, work]` assignments to workers.
//! - **Outcomes** (`outcome`): the structured result a worker reports for an
//!   executed action, consumed by the verifier.
//!
//! All frames are JSON. Workers are addressed by a stable [`WorkerId`]
//! (calling host plus process id).

pub mod messages;
pub mod outcome;

pub use messages::{
    Action, Assignment, Hello, JobId, JobResult, Work, WorkParams, WorkerId, WorkerMessage,
};
pub use outcome::{
    errno, format_timestamp, parse_timestamp, ErrorCode, Outcome, OutcomeData, OutcomeStatus,
    TargetPath, WireToken, TIMESTAMP_FORMAT,
};
