use super::{DeadLetterStore, JobStatus, JobStore, QueuedJob, backoff_delay};
use crate::config::QueueConfig;
use crate::error::CollaboratorError;
use crate::sync::EventProcessor;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one executor attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Completed,
    Retry {
        next_run_at: DateTime<Utc>,
        error: String,
    },
    DeadLetter {
        error: String,
        error_class: &'static str,
    },
}

/// Classify a failed attempt. Pure so tests drive the state machine with
/// their own clock: transient failures consume an attempt and back off on
/// the schedule; permanent failures dead-letter immediately.
pub fn classify_attempt(
    job: &QueuedJob,
    error: &CollaboratorError,
    schedule: &[i64],
    now: DateTime<Utc>,
) -> AttemptOutcome {
    if !error.is_transient() {
        return AttemptOutcome::DeadLetter {
            error: error.to_string(),
            error_class: error.class(),
        };
    }
    if job.attempt >= job.max_attempts {
        return AttemptOutcome::DeadLetter {
            error: format!("retries exhausted after {} attempts: {error}", job.attempt),
            error_class: error.class(),
        };
    }
    AttemptOutcome::Retry {
        next_run_at: now + backoff_delay(schedule, job.attempt),
        error: error.to_string(),
    }
}

/// Queue consumer: claims due jobs, runs the business transformation, and
/// applies the retry/dead-letter policy.
pub struct Executor {
    store: Arc<JobStore>,
    dead_letters: Arc<DeadLetterStore>,
    processor: Arc<dyn EventProcessor>,
    queue: QueueConfig,
}

impl Executor {
    pub fn new(
        store: Arc<JobStore>,
        dead_letters: Arc<DeadLetterStore>,
        processor: Arc<dyn EventProcessor>,
        queue: QueueConfig,
    ) -> Self {
        Self {
            store,
            dead_letters,
            processor,
            queue,
        }
    }

    /// Long-running worker loop. Spawn one task per configured worker.
    pub async fn run(&self) {
        let poll = Duration::from_millis(self.queue.poll_interval_ms.max(50));
        let mut interval = tokio::time::interval(poll);
        loop {
            interval.tick().await;
            while let Some(job) = self.store.claim_due(Utc::now()) {
                self.process(job).await;
            }
        }
    }

    /// Run a single attempt for `job` and apply its outcome.
    pub async fn process(&self, mut job: QueuedJob) {
        job.attempt += 1;
        let attempt_timeout = Duration::from_secs(self.queue.attempt_timeout_secs.max(1));

        let result = tokio::time::timeout(attempt_timeout, self.processor.process(&job)).await;
        let outcome = match result {
            Ok(Ok(())) => AttemptOutcome::Completed,
            Ok(Err(error)) => classify_attempt(&job, &error, &self.queue.backoff_secs, Utc::now()),
            // A hung attempt is indistinguishable from a slow collaborator:
            // treat expiry as transient and let the backoff policy decide.
            Err(_elapsed) => {
                let error = CollaboratorError::Transient {
                    service: "executor",
                    status: None,
                    message: format!(
                        "attempt timed out after {}s",
                        self.queue.attempt_timeout_secs
                    ),
                };
                classify_attempt(&job, &error, &self.queue.backoff_secs, Utc::now())
            }
        };

        match outcome {
            AttemptOutcome::Completed => {
                job.status = JobStatus::Completed;
                tracing::info!(
                    job_id = %job.job_id,
                    webhook_id = job.webhook_id.as_deref().unwrap_or("-"),
                    event = %job.event,
                    attempt = job.attempt,
                    "job completed"
                );
            }
            AttemptOutcome::Retry { next_run_at, error } => {
                tracing::warn!(
                    job_id = %job.job_id,
                    event = %job.event,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    next_run_at = %next_run_at,
                    error,
                    "transient failure, retry scheduled"
                );
                job.last_error = Some(error);
                self.store.reschedule(job, next_run_at);
            }
            AttemptOutcome::DeadLetter { error, error_class } => {
                job.status = JobStatus::DeadLettered;
                tracing::error!(
                    job_id = %job.job_id,
                    webhook_id = job.webhook_id.as_deref().unwrap_or("-"),
                    event = %job.event,
                    attempt = job.attempt,
                    error_class,
                    error,
                    "job dead-lettered"
                );
                if let Err(persist_error) =
                    self.dead_letters
                        .record(&job, &error, error_class, Utc::now())
                {
                    tracing::error!(
                        job_id = %job.job_id,
                        "failed to persist dead-letter record: {persist_error:#}"
                    );
                }
            }
        }
    }
}
