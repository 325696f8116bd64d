//! Lazy, bounded job source
//!
//! Jobs waiting for redelivery always come first, most recently requeued
//! first. Otherwise a new job is minted from the counter range
//! `0..max_jobs`. Once both are exhausted the source stays empty.

use crate::protocol::{JobId, Work};

/// A unit of work assigned to exactly one worker at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub work: Work,
}

impl Job {
    pub fn new(work: Work) -> Self {
        Self {
            id: JobId::new(),
            work,
        }
    }
}

/// Requeue buffer plus bounded counter
#[derive(Debug)]
pub struct JobSource {
    requeue: Vec<Job>,
    next: u64,
    max_jobs: u64,
}

impl JobSource {
    pub fn new(max_jobs: u64) -> Self {
        Self {
            requeue: Vec::new(),
            next: 0,
            max_jobs,
        }
    }

    /// Next job, if any
    ///
    /// `plan` is only called when a new job is minted and receives the
    /// counter value of the new job.
    pub fn next_job<F>(&mut self, plan: F) -> Option<Job>
    where
        F: FnOnce(u64) -> Work,
    {
        if let Some(job) = self.requeue.pop() {
            return Some(job);
        }
        if self.next >= self.max_jobs {
            return None;
        }
        let num = self.next;
        self.next += 1;
        Some(Job::new(plan(num)))
    }

    /// Return jobs for redelivery
    pub fn requeue<I>(&mut self, jobs: I) -> usize
    where
        I: IntoIterator<Item = Job>,
    {
        let before = self.requeue.len();
        self.requeue.extend(jobs);
        self.requeue.len() - before
    }

    pub fn pending_requeue(&self) -> usize {
        self.requeue.len()
    }

    /// Ids waiting in the requeue buffer
    pub fn requeued_ids(&self) -> impl Iterator<Item = &JobId> + '_ {
        self.requeue.iter().map(|job| &job.id)
    }

    /// Jobs minted so far
    pub fn minted(&self) -> u64 {
        self.next
    }

    pub fn is_exhausted(&self) -> bool {
        self.requeue.is_empty() && self.next >= self.max_jobs
    }
}
