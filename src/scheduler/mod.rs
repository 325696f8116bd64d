//! Job scheduling
//!
//! This module contains:
//! - `source`: lazy bounded job sequence with a LIFO requeue buffer
//! - `workload`: chooses the action and target of each new job
//! - `registry`: connected workers and their outstanding jobs
//! - `controller`: the single-threaded scheduler loop

pub mod controller;
pub mod registry;
pub mod source;
pub mod workload;

pub use controller::{Controller, RunReport};
pub use registry::{Completion, WorkerRegistry};
pub use source::{Job, JobSource};
pub use workload::WorkloadPlanner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by the loop and its collaborators
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask everyone holding this signal to stop
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for signal handlers
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());

        signal.stop();
        assert!(clone.is_stopped());

        let fresh = StopSignal::new();
        fresh.flag().store(true, Ordering::SeqCst);
        assert!(fresh.is_stopped());
    }
}
