//! Shadow-state consistency verifier
//!
//! Every structured outcome a worker reports is applied to the [`Namespace`]
//! and classified into a [`Verdict`]:
//!
//! | Verdict     | Meaning                                            | Level |
//! |-------------|----------------------------------------------------|-------|
//! | `Committed` | outcome applied to the model                       | debug |
//! | `Stale`     | target no longer tracked, outcome dropped          | debug |
//! | `Tolerated` | expected failure for this action                   | debug |
//! | `Corrected` | benign race, model brought in line                 | info  |
//! | `Retired`   | directory full, replaced by a fresh sibling        | info  |
//! | `Violation` | outcome contradicts the model                      | error |
//!
//! Outcomes arrive out of order and from several hosts, so most mismatches
//! are races; only the cases described by [`Violation`] are reported as
//! correctness failures.

mod failure;
mod success;

use crate::namespace::Namespace;
use crate::protocol::{Action, ErrorCode, Outcome, TargetPath, WireToken};
use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, error, info};

/// Classification of a single outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Committed,
    Stale,
    Tolerated { code: ErrorCode },
    Corrected,
    Retired { dir: String, replacement: String },
    Violation(Violation),
}

impl Verdict {
    pub fn is_violation(&self) -> bool {
        matches!(self, Verdict::Violation(_))
    }

    /// Short name used in logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Committed => "committed",
            Verdict::Stale => "stale",
            Verdict::Tolerated { .. } => "tolerated",
            Verdict::Corrected => "corrected",
            Verdict::Retired { .. } => "retired",
            Verdict::Violation(_) => "violation",
        }
    }
}

/// Outcome that contradicts the expected namespace state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A read returned content other than the last confirmed write
    #[error(
        "Hash mismatch on {path}: stored {stored}, read {reported} (offset {offset:?}, chunk size {chunk_size:?})"
    )]
    HashMismatch {
        path: TargetPath,
        stored: WireToken,
        reported: WireToken,
        offset: Option<u64>,
        chunk_size: Option<u64>,
    },

    /// An entry known to be on disk was reported missing
    #[error("{action} failed on {path} which is on disk (failed at {failed_at}, last confirmed {last_good})")]
    MissingEntry {
        action: Action,
        path: TargetPath,
        failed_at: NaiveDateTime,
        last_good: NaiveDateTime,
    },

    /// Failure the model cannot explain
    #[error("{action} failed unexpectedly on {path}: {code} {message}")]
    UnexpectedFailure {
        action: Action,
        path: TargetPath,
        code: String,
        message: String,
    },

    /// Failure on a target that does not name a directory or file
    #[error("{action} failed on unresolvable target '{target}': {code} {message}")]
    LostContext {
        action: Action,
        target: String,
        code: String,
        message: String,
    },
}

/// Applies outcomes to the namespace model
///
/// Owns the model so that it stays the single writer.
pub struct Verifier {
    namespace: Namespace,

    /// Tracked directory size at which a directory is retired
    dir_limit: Option<u64>,
}

impl Verifier {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            dir_limit: None,
        }
    }

    /// Retire directories once a mkdir or touch reports them at `limit` bytes
    pub fn with_dir_limit(mut self, limit: u64) -> Self {
        self.dir_limit = Some(limit);
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Apply an outcome and log its verdict
    pub fn apply(&mut self, outcome: &Outcome) -> Verdict {
        let verdict = if outcome.is_success() {
            success::apply(&mut self.namespace, outcome, self.dir_limit)
        } else {
            failure::apply(&mut self.namespace, outcome)
        };
        log_verdict(outcome, &verdict);
        verdict
    }
}

fn log_verdict(outcome: &Outcome, verdict: &Verdict) {
    match verdict {
        Verdict::Committed => {
            debug!(action = %outcome.action, target = %outcome.target, "Outcome committed")
        }
        Verdict::Stale => {
            debug!(action = %outcome.action, target = %outcome.target, "Target no longer tracked, dropping outcome")
        }
        Verdict::Tolerated { code } => {
            debug!(action = %outcome.action, target = %outcome.target, code = %code, "Expected failure")
        }
        Verdict::Corrected => {
            info!(action = %outcome.action, target = %outcome.target, "Result verify OK, model corrected")
        }
        Verdict::Retired { dir, replacement } => {
            info!(dir = %dir, replacement = %replacement, "Directory reached its size limit, replaced")
        }
        Verdict::Violation(v) => {
            error!(
                action = %outcome.action,
                target = %outcome.target,
                timestamp = %outcome.timestamp,
                "Result verify FAILED: {}",
                v
            )
        }
    }
}
