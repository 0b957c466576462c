//! Worker configuration.

use std::time::Duration;

use mediaq_media::RunnerConfig;
use mediaq_models::JobErrorKind;
use mediaq_queue::QueueConfig;

/// Re-run policy for failures that may not recur.
///
/// Only `execution_error` and `timeout_error` are retried; a non-zero exit
/// is a property of the input and fails immediately. The job stays Running
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first; zero disables retries
    pub max_retries: u32,
    /// Pause before each retry
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Whether a job that failed with `kind` after `attempts` invocations
    /// gets another one.
    pub fn should_retry(&self, kind: JobErrorKind, attempts: u32) -> bool {
        attempts <= self.max_retries
            && matches!(kind, JobErrorKind::ExecutionError | JobErrorKind::TimeoutError)
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Tool invocation settings
    pub runner: RunnerConfig,
    /// Waiting list settings
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    pub fn new(max_concurrent_jobs: usize, runner: RunnerConfig) -> Self {
        Self {
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            shutdown_timeout: Duration::from_secs(30),
            runner,
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_disabled_by_default() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(JobErrorKind::TimeoutError, 1));
    }

    #[test]
    fn test_retry_only_transient_kinds() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        assert!(policy.should_retry(JobErrorKind::ExecutionError, 1));
        assert!(policy.should_retry(JobErrorKind::TimeoutError, 2));
        assert!(!policy.should_retry(JobErrorKind::TimeoutError, 3));
        assert!(!policy.should_retry(JobErrorKind::NonZeroExitError, 1));
        assert!(!policy.should_retry(JobErrorKind::Cancelled, 1));
        assert!(!policy.should_retry(JobErrorKind::InternalError, 1));
    }
}
