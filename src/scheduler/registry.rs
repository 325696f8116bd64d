//! Connected workers and their outstanding jobs

use crate::error::ProtocolError;
use crate::protocol::{JobId, WorkerId};
use crate::scheduler::source::Job;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// State of one connected worker
#[derive(Debug)]
struct WorkerEntry {
    /// Outstanding jobs in assignment order
    outstanding: Vec<Job>,
    last_seen: Instant,
}

/// Result of completing a job
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// Job removed from the worker's outstanding set
    Completed(Job),

    /// No such worker, e.g. already reaped
    UnknownWorker,

    /// Worker does not hold this job
    UnknownJob,
}

/// Registry of connected workers
///
/// Insertion order is kept so that ties in load are broken the same way on
/// every run.
#[derive(Debug)]
pub struct WorkerRegistry {
    order: Vec<WorkerId>,
    workers: HashMap<WorkerId, WorkerEntry>,
    max_jobs_per_worker: usize,
}

impl WorkerRegistry {
    pub fn new(max_jobs_per_worker: usize) -> Self {
        Self {
            order: Vec::new(),
            workers: HashMap::new(),
            max_jobs_per_worker,
        }
    }

    /// Add a worker with no outstanding jobs
    pub fn register_worker(&mut self, id: &WorkerId, now: Instant) -> Result<(), ProtocolError> {
        if self.workers.contains_key(id) {
            return Err(ProtocolError::DuplicateConnect(id.clone()));
        }
        self.order.push(id.clone());
        self.workers.insert(
            id.clone(),
            WorkerEntry {
                outstanding: Vec::new(),
                last_seen: now,
            },
        );
        Ok(())
    }

    /// Remove a worker, returning the jobs it still held
    pub fn unregister_worker(&mut self, id: &WorkerId) -> Option<Vec<Job>> {
        let entry = self.workers.remove(id)?;
        self.order.retain(|w| w != id);
        Some(entry.outstanding)
    }

    /// Least-loaded worker with room for another job
    pub fn select_worker(&self) -> Option<WorkerId> {
        let mut best: Option<(&WorkerId, usize)> = None;
        for id in &self.order {
            let load = self.workers.get(id).map_or(usize::MAX, |w| w.outstanding.len());
            if best.map_or(true, |(_, b)| load < b) {
                best = Some((id, load));
            }
        }
        match best {
            Some((id, load)) if load < self.max_jobs_per_worker => Some(id.clone()),
            _ => None,
        }
    }

    /// Record a job as outstanding on a worker
    ///
    /// Hands the job back when the worker is unknown.
    pub fn assign(&mut self, id: &WorkerId, job: Job) -> Result<(), Job> {
        match self.workers.get_mut(id) {
            Some(entry) => {
                entry.outstanding.push(job);
                Ok(())
            }
            None => Err(job),
        }
    }

    /// Remove a completed job from a worker
    pub fn complete(&mut self, id: &WorkerId, job_id: &JobId) -> Completion {
        let Some(entry) = self.workers.get_mut(id) else {
            return Completion::UnknownWorker;
        };
        match entry.outstanding.iter().position(|job| &job.id == job_id) {
            Some(pos) => Completion::Completed(entry.outstanding.remove(pos)),
            None => Completion::UnknownJob,
        }
    }

    /// Record that a message arrived from a worker
    pub fn touch(&mut self, id: &WorkerId, now: Instant) {
        if let Some(entry) = self.workers.get_mut(id) {
            entry.last_seen = now;
        }
    }

    /// Busy workers that have been silent for longer than `timeout`
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<WorkerId> {
        self.order
            .iter()
            .filter(|id| {
                self.workers.get(*id).is_some_and(|w| {
                    !w.outstanding.is_empty() && now.saturating_duration_since(w.last_seen) > timeout
                })
            })
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains_key(id)
    }

    pub fn outstanding(&self, id: &WorkerId) -> usize {
        self.workers.get(id).map_or(0, |w| w.outstanding.len())
    }

    /// Ids of every outstanding job, across all workers
    pub fn outstanding_ids(&self) -> impl Iterator<Item = &JobId> + '_ {
        self.workers
            .values()
            .flat_map(|w| w.outstanding.iter().map(|job| &job.id))
    }

    pub fn total_outstanding(&self) -> usize {
        self.workers.values().map(|w| w.outstanding.len()).sum()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn max_jobs_per_worker(&self) -> usize {
        self.max_jobs_per_worker
    }
}
