//! Job scheduler.
//!
//! Owns the active job table and dispatches queued jobs onto the process
//! runner while fewer than `max_concurrent_jobs` are running. All state
//! transitions happen under one lock. A terminal job is written to the
//! result store before it leaves the active table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinError;
use tracing::{error, info, warn, Instrument};

use mediaq_media::{FfmpegProgress, JobOutput, MediaError, ProcessRunner};
use mediaq_models::{Job, JobError, JobId, JobState, SubmitJobRequest};
use mediaq_queue::{JobQueue, QueueError};
use mediaq_storage::{Artifact, ResultStore, StorageError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub retained: usize,
    pub max_concurrent_jobs: usize,
    pub accepting: bool,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    /// Whether a cancellation was applied or signalled
    pub cancelled: bool,
    /// State at the time of the request
    pub state: JobState,
}

struct SchedulerState {
    queue: JobQueue,
    /// Cancellation senders of running jobs
    running: HashMap<JobId, watch::Sender<bool>>,
    accepting: bool,
}

struct Inner {
    config: WorkerConfig,
    runner: ProcessRunner,
    store: Arc<ResultStore>,
    state: Mutex<SchedulerState>,
    /// Signalled whenever the running set becomes empty
    idle: Notify,
}

/// Bounded-concurrency job scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: WorkerConfig, store: Arc<ResultStore>) -> Self {
        let runner = ProcessRunner::new(config.runner.clone());
        let state = SchedulerState {
            queue: JobQueue::new(config.queue.clone()),
            running: HashMap::new(),
            accepting: true,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                store,
                state: Mutex::new(state),
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.inner.runner
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.inner.store
    }

    /// Queue a job and start it right away if a slot is free.
    ///
    /// The request is expected to be validated already.
    pub async fn submit(&self, request: SubmitJobRequest) -> WorkerResult<JobId> {
        let job = request.into_job();
        let logger = JobLogger::new(&job);
        let priority = job.priority;

        let mut state = self.inner.state.lock().await;
        if !state.accepting {
            metrics::record_job_rejected("shutting_down");
            return Err(QueueError::ShuttingDown.into());
        }

        let id = match state.queue.enqueue(job) {
            Ok(id) => id,
            Err(e) => {
                if matches!(e, QueueError::QueueFull { .. }) {
                    metrics::record_job_rejected("queue_full");
                    logger.log_warning(&e.to_string());
                }
                return Err(e.into());
            }
        };

        metrics::record_job_submitted();
        logger.log_queued(priority, state.queue.queued_len());
        self.dispatch(&mut state);
        Ok(id)
    }

    /// Current view of a job, active or retained.
    pub async fn status(&self, id: &JobId) -> WorkerResult<Job> {
        let state = self.inner.state.lock().await;
        if let Some(job) = state.queue.get(id) {
            return Ok(job.clone());
        }
        self.inner
            .store
            .get(id)
            .await
            .ok_or_else(|| WorkerError::job_not_found(id.as_str()))
    }

    /// Cancel a job.
    ///
    /// Queued jobs are cancelled immediately without invoking the tool.
    /// Running jobs are signalled and become Cancelled once the runner has
    /// terminated the process. Terminal jobs are left untouched.
    pub async fn cancel(&self, id: &JobId) -> WorkerResult<CancelOutcome> {
        let mut state = self.inner.state.lock().await;

        if let Some(job) = state.queue.cancel_queued(id) {
            JobLogger::new(&job).log_cancelled(false);
            metrics::record_job_finished(JobState::Cancelled, None);
            self.retain(job).await;
            metrics::set_job_counts(state.queue.queued_len(), state.running.len());
            return Ok(CancelOutcome {
                cancelled: true,
                state: JobState::Cancelled,
            });
        }

        if let Some(cancel_tx) = state.running.get(id) {
            cancel_tx.send_replace(true);
            info!(job_id = %id, "Cancellation requested for running job");
            return Ok(CancelOutcome {
                cancelled: true,
                state: JobState::Running,
            });
        }

        match self.inner.store.get(id).await {
            Some(job) => Ok(CancelOutcome {
                cancelled: false,
                state: job.state,
            }),
            None => Err(WorkerError::job_not_found(id.as_str())),
        }
    }

    /// Active jobs followed by retained ones.
    pub async fn list(&self) -> Vec<Job> {
        let state = self.inner.state.lock().await;
        let mut jobs = state.queue.snapshot();
        jobs.extend(self.inner.store.list().await);
        jobs
    }

    pub async fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock().await;
        SchedulerStats {
            queued: state.queue.queued_len(),
            running: state.running.len(),
            retained: self.inner.store.len().await,
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
            accepting: state.accepting,
        }
    }

    pub async fn is_accepting(&self) -> bool {
        self.inner.state.lock().await.accepting
    }

    /// Resolve the artifact of a succeeded job.
    pub async fn artifact(&self, id: &JobId) -> WorkerResult<Artifact> {
        let job = self.status(id).await?;
        if job.state != JobState::Succeeded {
            return Err(StorageError::NotReady(job.state).into());
        }
        self.inner.store.artifact(id).await.map_err(|e| match e {
            StorageError::NotFound(id) => WorkerError::JobNotFound(id),
            other => other.into(),
        })
    }

    /// Delete a terminal job's stored result and artifact.
    pub async fn delete_result(&self, id: &JobId) -> WorkerResult<Job> {
        let state = self.inner.state.lock().await;
        if let Some(job) = state.queue.get(id) {
            return Err(QueueError::invalid_state(format!("job is still {}", job.state)).into());
        }
        self.inner.store.remove(id).await.map_err(|e| match e {
            StorageError::NotFound(id) => WorkerError::JobNotFound(id),
            other => other.into(),
        })
    }

    /// Stop accepting work, cancel queued jobs and drain running ones.
    ///
    /// Jobs still running after the shutdown timeout are cancelled; this
    /// returns once every subprocess has been reaped. Later callers wait
    /// for the same drain.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if !state.accepting {
                drop(state);
                self.wait_idle().await;
                return;
            }
            state.accepting = false;

            let cancelled = state.queue.cancel_all_queued();
            info!(
                cancelled = cancelled.len(),
                running = state.running.len(),
                "Scheduler shutting down"
            );
            for job in cancelled {
                JobLogger::new(&job).log_cancelled(false);
                metrics::record_job_finished(JobState::Cancelled, None);
                self.retain(job).await;
            }
            metrics::set_job_counts(state.queue.queued_len(), state.running.len());
        }

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wait_idle()).await.is_err() {
            let state = self.inner.state.lock().await;
            warn!(
                running = state.running.len(),
                "Shutdown timeout of {:?} elapsed, cancelling running jobs", timeout
            );
            for cancel_tx in state.running.values() {
                cancel_tx.send_replace(true);
            }
            drop(state);
            self.wait_idle().await;
        }

        info!("Scheduler stopped");
    }

    /// Wait until no job is running.
    async fn wait_idle(&self) {
        loop {
            // Registered before the check so a concurrent notify is not lost
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().await.running.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Start queued jobs while slots are free.
    fn dispatch(&self, state: &mut SchedulerState) {
        while state.running.len() < self.inner.config.max_concurrent_jobs {
            let Some(job) = state.queue.start_next() else {
                break;
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            state.running.insert(job.id.clone(), cancel_tx);

            let logger = JobLogger::new(&job);
            logger.log_start(state.running.len());

            let scheduler = self.clone();
            tokio::spawn(
                async move { scheduler.execute(job, cancel_rx).await }
                    .instrument(logger.create_span()),
            );
        }
        metrics::set_job_counts(state.queue.queued_len(), state.running.len());
    }

    /// Run one job to completion and record the outcome.
    ///
    /// Transient failures are re-run per the retry policy while the job
    /// stays Running; a cancel during the retry delay ends it at once.
    async fn execute(self, job: Job, mut cancel_rx: watch::Receiver<bool>) {
        let id = job.id.clone();
        let logger = JobLogger::new(&job);
        let retry = self.inner.config.retry;
        let started = Instant::now();
        let mut attempts = 1;

        let joined = loop {
            let joined = self.run_attempt(job.clone(), cancel_rx.clone(), &logger).await;

            let retryable = match &joined {
                Ok(Err(e)) if !e.is_cancelled() => {
                    let error = e.to_job_error();
                    retry.should_retry(error.kind, attempts).then_some(error)
                }
                _ => None,
            };
            let Some(error) = retryable else {
                break joined;
            };

            logger.log_retry(attempts, retry.max_retries, retry.retry_delay, &error);
            metrics::record_job_retried(error.kind.as_str());

            tokio::select! {
                _ = tokio::time::sleep(retry.retry_delay) => {}
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                    break Ok(Err(MediaError::Cancelled));
                }
            }

            if !self.begin_retry(&id).await {
                break joined;
            }
            attempts += 1;
        };

        self.finish(&id, joined, started.elapsed()).await;
    }

    /// One tool invocation. The runner gets its own task so a panic
    /// surfaces as a `JoinError`.
    async fn run_attempt(
        &self,
        job: Job,
        cancel_rx: watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> Result<Result<JobOutput, MediaError>, JoinError> {
        let id = job.id.clone();
        let (progress_tx, mut progress_rx) = watch::channel::<Option<FfmpegProgress>>(None);
        let runner = self.inner.runner.clone();

        let mut handle = tokio::spawn(async move {
            runner
                .run(&job, cancel_rx, move |progress| {
                    progress_tx.send_replace(Some(progress));
                })
                .await
        });

        loop {
            tokio::select! {
                joined = &mut handle => break joined,
                changed = progress_rx.changed() => {
                    if changed.is_err() {
                        break (&mut handle).await;
                    }
                    let snapshot = progress_rx.borrow_and_update().clone();
                    if let Some(progress) = snapshot {
                        logger.log_progress(&progress.out_time, progress.speed);
                        self.update_progress(&id, progress).await;
                    }
                }
            }
        }
    }

    /// Count another attempt on the active job.
    async fn begin_retry(&self, id: &JobId) -> bool {
        let mut state = self.inner.state.lock().await;
        state
            .queue
            .get_mut(id)
            .map(|job| job.begin_retry())
            .unwrap_or(false)
    }

    async fn update_progress(&self, id: &JobId, progress: FfmpegProgress) {
        let mut state = self.inner.state.lock().await;
        if let Some(job) = state.queue.get_mut(id) {
            job.set_progress(progress);
        }
    }

    /// Record the terminal state, hand the job to the store and refill slots.
    async fn finish(
        &self,
        id: &JobId,
        joined: Result<Result<JobOutput, MediaError>, JoinError>,
        elapsed: Duration,
    ) {
        let mut state = self.inner.state.lock().await;
        state.running.remove(id);

        let logger = JobLogger::from_id(id);
        let Some(job) = state.queue.get_mut(id) else {
            error!(job_id = %id, "Finished job missing from the active table");
            self.dispatch(&mut state);
            self.notify_if_idle(&state);
            return;
        };

        match joined {
            Ok(Ok(output)) => {
                let duration_ms = output.result.duration.as_millis() as u64;
                metrics::record_tool_duration(output.result.duration.as_secs_f64());
                let output_ref = output
                    .artifact
                    .map(|path| path.to_string_lossy().into_owned());
                logger.log_completion(duration_ms, output_ref.as_deref());

                job.exit_code = output.result.exit_code;
                job.duration_ms = Some(duration_ms);
                job.mark_succeeded(output_ref);
                metrics::record_job_finished(JobState::Succeeded, None);
            }
            Ok(Err(e)) if e.is_cancelled() => {
                logger.log_cancelled(true);
                job.duration_ms = Some(elapsed.as_millis() as u64);
                job.mark_cancelled();
                metrics::record_job_finished(JobState::Cancelled, None);
            }
            Ok(Err(e)) => {
                let job_error = e.to_job_error();
                logger.log_failure(&job_error);
                metrics::record_job_finished(JobState::Failed, Some(job_error.kind.as_str()));
                job.duration_ms = Some(elapsed.as_millis() as u64);
                job.mark_failed(job_error);
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "Job task panicked"
                } else {
                    "Job task was aborted"
                };
                let job_error = JobError::internal(message);
                logger.log_failure(&job_error);
                metrics::record_job_finished(JobState::Failed, Some(job_error.kind.as_str()));
                job.duration_ms = Some(elapsed.as_millis() as u64);
                job.mark_failed(job_error);
            }
        }

        let finished = job.clone();
        self.retain(finished).await;
        state.queue.remove_finished(id);

        self.dispatch(&mut state);
        self.notify_if_idle(&state);
    }

    async fn retain(&self, job: Job) {
        let id = job.id.clone();
        if let Err(e) = self.inner.store.insert(job).await {
            error!(job_id = %id, "Failed to store job result: {}", e);
        }
    }

    fn notify_if_idle(&self, state: &SchedulerState) {
        if state.running.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_media::RunnerConfig;
    use mediaq_storage::StoreConfig;
    use tempfile::TempDir;

    fn scheduler(dir: &TempDir) -> Scheduler {
        let mut runner = RunnerConfig::new("/bin/sh", dir.path().join("artifacts"));
        runner.tool_args = vec!["-c".to_string(), "exit 0".to_string(), "ffmpeg".to_string()];
        let store = Arc::new(ResultStore::new(StoreConfig::default()));
        Scheduler::new(WorkerConfig::new(1, runner), store)
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir);
        let id = JobId::new();

        assert!(matches!(
            scheduler.status(&id).await,
            Err(WorkerError::JobNotFound(_))
        ));
        assert!(matches!(
            scheduler.cancel(&id).await,
            Err(WorkerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_start_empty() {
        let dir = TempDir::new().unwrap();
        let stats = scheduler(&dir).stats().await;
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.max_concurrent_jobs, 1);
        assert!(stats.accepting);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_jobs() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(&dir);
        scheduler.shutdown().await;

        let err = scheduler
            .submit(SubmitJobRequest::new("/in/a.mp4"))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(!scheduler.is_accepting().await);
    }
}
