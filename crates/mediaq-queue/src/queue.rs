//! Active job table with priority ordering.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use mediaq_models::{Job, JobId, JobState};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs waiting to run
    pub max_queued_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queued_jobs: 1000,
        }
    }
}

/// Dispatch order: higher priority first, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// Queued and running jobs.
///
/// Terminal jobs leave the queue; the caller hands them to the result store.
#[derive(Debug)]
pub struct JobQueue {
    config: QueueConfig,
    jobs: HashMap<JobId, Job>,
    pending: BTreeMap<PendingKey, JobId>,
    pending_keys: HashMap<JobId, PendingKey>,
    next_seq: u64,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            jobs: HashMap::new(),
            pending: BTreeMap::new(),
            pending_keys: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Add a queued job. Fails if the waiting list is at capacity.
    pub fn enqueue(&mut self, job: Job) -> QueueResult<JobId> {
        if job.state != JobState::Queued {
            return Err(QueueError::invalid_state(format!(
                "cannot enqueue job in state {}",
                job.state
            )));
        }
        if self.pending.len() >= self.config.max_queued_jobs {
            return Err(QueueError::QueueFull {
                limit: self.config.max_queued_jobs,
            });
        }

        let key = PendingKey {
            priority: Reverse(job.priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let id = job.id.clone();
        self.pending.insert(key, id.clone());
        self.pending_keys.insert(id.clone(), key);
        self.jobs.insert(id.clone(), job);
        debug!(job_id = %id, queued = self.pending.len(), "Job enqueued");
        Ok(id)
    }

    /// Move the next queued job to Running and return a snapshot of it.
    pub fn start_next(&mut self) -> Option<Job> {
        while let Some((_, id)) = self.pending.pop_first() {
            self.pending_keys.remove(&id);
            if let Some(job) = self.jobs.get_mut(&id) {
                if job.mark_running() {
                    return Some(job.clone());
                }
            }
        }
        None
    }

    /// Cancel a job that has not started. Returns the cancelled job, now
    /// removed from the queue, or `None` if the job is not waiting.
    pub fn cancel_queued(&mut self, id: &JobId) -> Option<Job> {
        let key = self.pending_keys.remove(id)?;
        self.pending.remove(&key);
        let mut job = self.jobs.remove(id)?;
        job.mark_cancelled();
        Some(job)
    }

    /// Cancel every waiting job, in dispatch order.
    pub fn cancel_all_queued(&mut self) -> Vec<Job> {
        let ids: Vec<JobId> = self.pending.values().cloned().collect();
        ids.iter().filter_map(|id| self.cancel_queued(id)).collect()
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// Remove a job that has reached a terminal state.
    pub fn remove_finished(&mut self, id: &JobId) -> Option<Job> {
        match self.jobs.get(id) {
            Some(job) if job.is_terminal() => self.jobs.remove(id),
            _ => None,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.jobs.len() - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Waiting job ids in dispatch order.
    pub fn queued_ids(&self) -> Vec<JobId> {
        self.pending.values().cloned().collect()
    }

    /// Snapshot of active jobs: running first, then queued in dispatch order.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut running: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .cloned()
            .collect();
        running.sort_by_key(|j| j.started_at);

        let queued = self
            .pending
            .values()
            .filter_map(|id| self.jobs.get(id).cloned());

        running.extend(queued);
        running
    }
}
