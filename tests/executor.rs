use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use crmbridge::config::QueueConfig;
use crmbridge::error::CollaboratorError;
use crmbridge::gateway::events::EventType;
use crmbridge::queue::{
    AttemptOutcome, DeadLetterStore, Executor, JobStore, QueuedJob, classify_attempt,
};
use crmbridge::sync::EventProcessor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const DEFAULT_SCHEDULE: [i64; 5] = [60, 120, 300, 600, 1800];

/// Fails with a 503 until `fail_until_attempt` calls have been made.
struct FlakyProcessor {
    calls: Arc<AtomicUsize>,
    fail_until_attempt: usize,
}

#[async_trait]
impl EventProcessor for FlakyProcessor {
    async fn process(&self, _job: &QueuedJob) -> Result<(), CollaboratorError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_until_attempt {
            return Err(CollaboratorError::Transient {
                service: "crm",
                status: Some(503),
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

struct PermanentFailureProcessor {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EventProcessor for PermanentFailureProcessor {
    async fn process(&self, _job: &QueuedJob) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Permanent {
            service: "crm",
            status: Some(422),
            message: "referenced record no longer exists".into(),
        })
    }
}

struct HangingProcessor;

#[async_trait]
impl EventProcessor for HangingProcessor {
    async fn process(&self, _job: &QueuedJob) -> Result<(), CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

fn sample_job(max_attempts: u32) -> QueuedJob {
    QueuedJob::new(
        Some("w1".into()),
        EventType::MessageCreated,
        serde_json::json!({"id": "w1", "event": "message_created"}),
        max_attempts,
        Utc::now(),
    )
}

fn fast_queue_config(max_attempts: u32) -> QueueConfig {
    QueueConfig {
        max_attempts,
        backoff_secs: vec![0, 0, 0, 0, 0],
        workers: 1,
        poll_interval_ms: 10,
        attempt_timeout_secs: 5,
        pending_cap: 100,
    }
}

fn spawn_executor(
    store: &Arc<JobStore>,
    dead_letters: &Arc<DeadLetterStore>,
    processor: Arc<dyn EventProcessor>,
    queue: QueueConfig,
) -> tokio::task::JoinHandle<()> {
    let executor = Arc::new(Executor::new(
        Arc::clone(store),
        Arc::clone(dead_letters),
        processor,
        queue,
    ));
    tokio::spawn(async move { executor.run().await })
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// A job that always fails transiently is attempted exactly `max_attempts`
/// times, with strictly increasing gaps that follow the backoff schedule,
/// then dead-letters and is never attempted again.
#[test]
fn retry_bound_follows_backoff_schedule() {
    let store = JobStore::new(100);
    let now = Utc::now();
    let error = CollaboratorError::Transient {
        service: "crm",
        status: Some(503),
        message: "service unavailable".into(),
    };

    store.enqueue(sample_job(5), now).unwrap();
    let mut clock = now;
    let mut gaps = Vec::new();
    let mut attempts = 0;

    loop {
        let Some(mut claimed) = store.claim_due(clock) else {
            panic!("job should be due at attempt {}", attempts + 1);
        };
        claimed.attempt += 1;
        attempts += 1;

        match classify_attempt(&claimed, &error, &DEFAULT_SCHEDULE, clock) {
            AttemptOutcome::Retry { next_run_at, .. } => {
                gaps.push((next_run_at - clock).num_seconds());
                store.reschedule(claimed, next_run_at);
                // Just before the deadline nothing is due; at it, the job is.
                assert!(
                    store
                        .claim_due(next_run_at - ChronoDuration::seconds(1))
                        .is_none()
                );
                clock = next_run_at;
            }
            AttemptOutcome::DeadLetter { error, .. } => {
                assert!(error.contains("retries exhausted"));
                break;
            }
            AttemptOutcome::Completed => panic!("processor never succeeds"),
        }
    }

    assert_eq!(attempts, 5);
    assert_eq!(gaps, vec![60, 120, 300, 600]);
    // Terminal: nothing left to claim, ever.
    assert!(store.claim_due(clock + ChronoDuration::days(30)).is_none());
}

/// Scenario: three 503s then success on the fourth attempt (max 5).
#[tokio::test]
async fn job_completes_after_transient_failures() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JobStore::new(100));
    let dead_letters = Arc::new(DeadLetterStore::new(tmp.path()));
    let calls = Arc::new(AtomicUsize::new(0));
    let processor = Arc::new(FlakyProcessor {
        calls: Arc::clone(&calls),
        fail_until_attempt: 3,
    });

    let handle = spawn_executor(&store, &dead_letters, processor, fast_queue_config(5));
    store.enqueue(sample_job(5), Utc::now()).unwrap();

    wait_for(
        || calls.load(Ordering::SeqCst) >= 4 && store.depths() == (0, 0),
        "job to complete after retries",
    )
    .await;
    // Settle: no further attempts happen after completion.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(dead_letters.count().unwrap(), 0);

    handle.abort();
}

#[tokio::test]
async fn permanent_failure_dead_letters_without_retry() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JobStore::new(100));
    let dead_letters = Arc::new(DeadLetterStore::new(tmp.path()));
    let calls = Arc::new(AtomicUsize::new(0));
    let processor = Arc::new(PermanentFailureProcessor {
        calls: Arc::clone(&calls),
    });

    let handle = spawn_executor(&store, &dead_letters, processor, fast_queue_config(5));
    store.enqueue(sample_job(5), Utc::now()).unwrap();

    wait_for(
        || dead_letters.count().unwrap_or(0) == 1,
        "permanent failure to dead-letter",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let records = dead_letters.list(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 1);
    assert_eq!(records[0].error_class, "permanent");
    assert!(records[0].error.contains("no longer exists"));
    assert_eq!(store.depths(), (0, 0));

    handle.abort();
}

#[tokio::test]
async fn exhausted_transient_retries_dead_letter_with_payload() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JobStore::new(100));
    let dead_letters = Arc::new(DeadLetterStore::new(tmp.path()));
    let calls = Arc::new(AtomicUsize::new(0));
    let processor = Arc::new(FlakyProcessor {
        calls: Arc::clone(&calls),
        fail_until_attempt: usize::MAX,
    });

    let handle = spawn_executor(&store, &dead_letters, processor, fast_queue_config(3));
    store.enqueue(sample_job(3), Utc::now()).unwrap();

    wait_for(
        || dead_letters.count().unwrap_or(0) == 1,
        "retries to exhaust",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let records = dead_letters.list(10).unwrap();
    assert_eq!(records[0].attempts, 3);
    assert_eq!(records[0].error_class, "transient");
    assert!(records[0].payload.contains("message_created"));

    handle.abort();
}

#[tokio::test]
async fn hung_attempt_times_out_as_transient() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JobStore::new(100));
    let dead_letters = Arc::new(DeadLetterStore::new(tmp.path()));

    let mut queue = fast_queue_config(2);
    queue.attempt_timeout_secs = 1;
    let handle = spawn_executor(&store, &dead_letters, Arc::new(HangingProcessor), queue);
    store.enqueue(sample_job(2), Utc::now()).unwrap();

    wait_for(
        || dead_letters.count().unwrap_or(0) == 1,
        "hung attempts to exhaust",
    )
    .await;

    let records = dead_letters.list(10).unwrap();
    assert_eq!(records[0].attempts, 2);
    assert_eq!(records[0].error_class, "transient");
    assert!(records[0].error.contains("timed out"));

    handle.abort();
}
