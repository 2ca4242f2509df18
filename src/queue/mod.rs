pub mod dead_letter;
pub mod store;
pub mod worker;

pub use dead_letter::{DeadLetterRecord, DeadLetterStore};
pub use store::JobStore;
pub use worker::{AttemptOutcome, Executor, classify_attempt};

use crate::gateway::events::EventType;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum QueuePriority {
    High,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    DeadLettered,
}

/// A unit of deferred work derived from an accepted webhook envelope.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: Uuid,
    /// Source idempotency key; `None` for the non-deduplicable event class.
    pub webhook_id: Option<String>,
    pub event: EventType,
    pub payload: serde_json::Value,
    pub priority: QueuePriority,
    /// Attempts consumed so far; incremented by the executor before each run.
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(
        webhook_id: Option<String>,
        event: EventType,
        payload: serde_json::Value,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            webhook_id,
            event,
            payload,
            priority: event.priority(),
            attempt: 0,
            max_attempts: max_attempts.max(1),
            next_run_at: now,
            enqueued_at: now,
            status: JobStatus::Pending,
            last_error: None,
        }
    }
}

/// Delay before retrying attempt `attempt` (1-based). The schedule's last
/// entry repeats for any attempts beyond its length.
pub fn backoff_delay(schedule: &[i64], attempt: u32) -> Duration {
    let index = (attempt.saturating_sub(1) as usize).min(schedule.len().saturating_sub(1));
    Duration::seconds(schedule.get(index).copied().unwrap_or(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEDULE: [i64; 5] = [60, 120, 300, 600, 1800];

    #[test]
    fn backoff_follows_the_schedule() {
        assert_eq!(backoff_delay(&SCHEDULE, 1), Duration::seconds(60));
        assert_eq!(backoff_delay(&SCHEDULE, 2), Duration::seconds(120));
        assert_eq!(backoff_delay(&SCHEDULE, 3), Duration::seconds(300));
        assert_eq!(backoff_delay(&SCHEDULE, 4), Duration::seconds(600));
        assert_eq!(backoff_delay(&SCHEDULE, 5), Duration::seconds(1800));
    }

    #[test]
    fn backoff_saturates_at_the_last_entry() {
        assert_eq!(backoff_delay(&SCHEDULE, 9), Duration::seconds(1800));
    }

    #[test]
    fn backoff_tolerates_empty_schedule() {
        assert_eq!(backoff_delay(&[], 1), Duration::seconds(60));
    }

    #[test]
    fn new_job_inherits_event_priority() {
        let now = Utc::now();
        let job = QueuedJob::new(
            Some("w1".into()),
            EventType::MessageCreated,
            serde_json::json!({"id": "w1"}),
            5,
            now,
        );
        assert_eq!(job.priority, QueuePriority::Normal);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.next_run_at, now);
    }
}
