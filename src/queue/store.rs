use super::{JobStatus, QueuePriority, QueuedJob};
use crate::error::QueueError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// In-memory priority queues shared between the intake path and the workers.
///
/// All access is through the single mutex; callers pass their own `now` so
/// scheduling decisions stay deterministic under test.
pub struct JobStore {
    inner: Mutex<Queues>,
    pending_cap: usize,
}

#[derive(Default)]
struct Queues {
    high: Vec<QueuedJob>,
    normal: Vec<QueuedJob>,
}

impl Queues {
    fn for_priority(&mut self, priority: QueuePriority) -> &mut Vec<QueuedJob> {
        match priority {
            QueuePriority::High => &mut self.high,
            QueuePriority::Normal => &mut self.normal,
        }
    }
}

impl JobStore {
    pub fn new(pending_cap: usize) -> Self {
        Self {
            inner: Mutex::new(Queues::default()),
            pending_cap: pending_cap.max(1),
        }
    }

    /// Schedule a job to run no earlier than `not_before`. The delay is a
    /// batching hint, not a correctness requirement.
    pub fn enqueue(
        &self,
        mut job: QueuedJob,
        not_before: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut queues = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let queue = queues.for_priority(job.priority);
        if queue.len() >= self.pending_cap {
            return Err(QueueError::Saturated {
                queue: match job.priority {
                    QueuePriority::High => "high",
                    QueuePriority::Normal => "normal",
                },
                pending: queue.len(),
            });
        }
        job.status = JobStatus::Pending;
        job.next_run_at = not_before;
        queue.push(job);
        Ok(())
    }

    /// Claim the next due job, draining the high queue preferentially.
    /// The claimed job leaves the store; the caller owns its fate.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Option<QueuedJob> {
        let mut queues = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for priority in [QueuePriority::High, QueuePriority::Normal] {
            let queue = queues.for_priority(priority);
            if let Some(index) = queue.iter().position(|job| job.next_run_at <= now) {
                let mut job = queue.remove(index);
                job.status = JobStatus::Running;
                return Some(job);
            }
        }
        None
    }

    /// Put a transiently-failed job back with its backoff deadline. Retries
    /// bypass the pending cap: refusing one would lose accepted work.
    pub fn reschedule(&self, mut job: QueuedJob, next_run_at: DateTime<Utc>) {
        job.status = JobStatus::Retrying;
        job.next_run_at = next_run_at;
        let mut queues = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        queues.for_priority(job.priority).push(job);
    }

    /// Pending counts per queue, for the health endpoint.
    pub fn depths(&self) -> (usize, usize) {
        let queues = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (queues.high.len(), queues.normal.len())
    }
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (high, normal) = self.depths();
        f.debug_struct("JobStore")
            .field("high", &high)
            .field("normal", &normal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::EventType;
    use chrono::Duration;

    fn job(event: EventType, id: &str, now: DateTime<Utc>) -> QueuedJob {
        QueuedJob::new(
            Some(id.into()),
            event,
            serde_json::json!({"id": id}),
            5,
            now,
        )
    }

    #[test]
    fn high_queue_drains_first() {
        let store = JobStore::new(100);
        let now = Utc::now();
        store
            .enqueue(job(EventType::MessageCreated, "normal-1", now), now)
            .unwrap();
        store
            .enqueue(job(EventType::ConversationCreated, "high-1", now), now)
            .unwrap();

        let first = store.claim_due(now).unwrap();
        assert_eq!(first.webhook_id.as_deref(), Some("high-1"));
        let second = store.claim_due(now).unwrap();
        assert_eq!(second.webhook_id.as_deref(), Some("normal-1"));
        assert!(store.claim_due(now).is_none());
    }

    #[test]
    fn not_before_is_respected() {
        let store = JobStore::new(100);
        let now = Utc::now();
        store
            .enqueue(
                job(EventType::MessageCreated, "w1", now),
                now + Duration::seconds(5),
            )
            .unwrap();

        assert!(store.claim_due(now).is_none());
        assert!(store.claim_due(now + Duration::seconds(4)).is_none());
        assert!(store.claim_due(now + Duration::seconds(5)).is_some());
    }

    #[test]
    fn claimed_job_is_marked_running() {
        let store = JobStore::new(100);
        let now = Utc::now();
        store
            .enqueue(job(EventType::MessageCreated, "w1", now), now)
            .unwrap();
        let claimed = store.claim_due(now).unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(store.depths(), (0, 0));
    }

    #[test]
    fn saturated_queue_refuses_new_work() {
        let store = JobStore::new(1);
        let now = Utc::now();
        store
            .enqueue(job(EventType::MessageCreated, "w1", now), now)
            .unwrap();
        let err = store
            .enqueue(job(EventType::MessageCreated, "w2", now), now)
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::Saturated {
                queue: "normal",
                pending: 1
            }
        ));

        // The high queue is unaffected.
        store
            .enqueue(job(EventType::ConversationCreated, "w3", now), now)
            .unwrap();
    }

    #[test]
    fn reschedule_bypasses_the_cap() {
        let store = JobStore::new(1);
        let now = Utc::now();
        store
            .enqueue(job(EventType::MessageCreated, "w1", now), now)
            .unwrap();
        let claimed = store.claim_due(now).unwrap();
        store
            .enqueue(job(EventType::MessageCreated, "w2", now), now)
            .unwrap();

        store.reschedule(claimed, now + Duration::seconds(60));
        assert_eq!(store.depths(), (0, 2));

        let due = store.claim_due(now + Duration::seconds(60)).unwrap();
        assert_eq!(due.webhook_id.as_deref(), Some("w2"));
        let retried = store.claim_due(now + Duration::seconds(60)).unwrap();
        assert_eq!(retried.webhook_id.as_deref(), Some("w1"));
    }
}
