use chrono::{Duration, Utc};
use queuectl_core::{ExecutionOutcome, JobState, RetryPolicy, Transition};
use queuectl_queue::{EnqueueRequest, Queue, QueueError};
use tempfile::TempDir;

async fn open_queue() -> (TempDir, Queue) {
    let temp_dir = TempDir::new().unwrap();
    let queue = Queue::open(temp_dir.path().join("lifecycle.db")).await.unwrap();
    (temp_dir, queue)
}

fn failure() -> ExecutionOutcome {
    ExecutionOutcome::Failure("exit status 1".to_string())
}

#[tokio::test]
async fn test_failures_back_off_then_dead_letter() {
    let (_dir, queue) = open_queue().await;
    let policy = RetryPolicy::new(2.0).unwrap();
    queue
        .enqueue(EnqueueRequest::new("j2", "false").with_max_retries(3))
        .await
        .unwrap();

    let mut now = Utc::now();
    for n in 1..=2u32 {
        let job = queue.claim_at("w1", now).await.unwrap().unwrap();
        assert_eq!(job.attempts, n - 1);

        let transition = queue
            .complete_attempt_at(&job, "w1", &failure(), &policy, now)
            .await
            .unwrap();

        let run_after = match transition {
            Transition::Retry {
                attempts, run_after, ..
            } => {
                assert_eq!(attempts, n);
                run_after
            }
            other => panic!("Expected retry, got {:?}", other),
        };
        assert!(run_after >= now.timestamp() + 2i64.pow(n));

        // not claimable one second before the backoff deadline
        let early = now + Duration::seconds(run_after - now.timestamp() - 1);
        assert!(queue.claim_at("w1", early).await.unwrap().is_none());

        now += Duration::seconds(run_after - now.timestamp());
    }

    let job = queue.claim_at("w1", now).await.unwrap().unwrap();
    let transition = queue
        .complete_attempt_at(&job, "w1", &failure(), &policy, now)
        .await
        .unwrap();
    assert!(matches!(transition, Transition::Dead { attempts: 3, .. }));

    let dead = queue.get("j2").await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, dead.max_retries);
    assert_eq!(dead.last_error.as_deref(), Some("exit status 1"));
    assert!(dead.locked_by.is_none());

    // dead is absorbing without a manual retry
    let far_future = now + Duration::days(365);
    assert!(queue.claim_at("w1", far_future).await.unwrap().is_none());
    assert_eq!(queue.list_dlq().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dlq_retry_resets_and_can_die_again() {
    let (_dir, queue) = open_queue().await;
    let policy = RetryPolicy::default();
    queue
        .enqueue(EnqueueRequest::new("j2", "false").with_max_retries(1))
        .await
        .unwrap();

    let job = queue.claim("w1").await.unwrap().unwrap();
    queue.complete_attempt(&job, "w1", &failure(), &policy).await.unwrap();
    assert_eq!(queue.get("j2").await.unwrap().unwrap().state, JobState::Dead);

    let retried = queue.retry_dlq_job("j2").await.unwrap();
    assert_eq!(retried.state, JobState::Pending);
    assert_eq!(retried.attempts, 0);
    assert_eq!(retried.run_after, 0);
    assert!(retried.locked_by.is_none());
    assert!(retried.locked_at.is_none());
    assert!(retried.updated_at >= job.updated_at);
    assert!(queue.list_dlq().await.unwrap().is_empty());

    // retrying a job that is no longer dead is a state error
    match queue.retry_dlq_job("j2").await {
        Err(QueueError::InvalidState { id, actual }) => {
            assert_eq!(id, "j2");
            assert_eq!(actual, JobState::Pending);
        }
        other => panic!("Expected InvalidState, got {:?}", other),
    }

    let job = queue.claim("w2").await.unwrap().unwrap();
    assert_eq!(job.attempts, 0);
    let transition = queue.complete_attempt(&job, "w2", &failure(), &policy).await.unwrap();
    assert!(matches!(transition, Transition::Dead { attempts: 1, .. }));
}

#[tokio::test]
async fn test_delayed_job_not_claimable_early() {
    let (_dir, queue) = open_queue().await;
    let now = Utc::now();
    let run_at = now + Duration::seconds(60);

    queue
        .enqueue(EnqueueRequest::new("delayed", "true").with_run_at(run_at.to_rfc3339()))
        .await
        .unwrap();
    queue.enqueue(EnqueueRequest::new("ready", "true")).await.unwrap();

    let job = queue.claim_at("w1", now).await.unwrap().unwrap();
    assert_eq!(job.id, "ready");
    assert!(queue.claim_at("w1", now + Duration::seconds(30)).await.unwrap().is_none());

    let job = queue
        .claim_at("w1", now + Duration::seconds(61))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.id, "delayed");
}

#[tokio::test]
async fn test_duplicate_id_rejected_and_original_kept() {
    let (_dir, queue) = open_queue().await;
    let original = queue
        .enqueue(EnqueueRequest::new("dup", "echo original").with_max_retries(3))
        .await
        .unwrap();

    let result = queue
        .enqueue(EnqueueRequest::new("dup", "echo impostor").with_max_retries(9))
        .await;
    match result {
        Err(err @ QueueError::Conflict { .. }) => assert!(err.to_string().contains("dup")),
        other => panic!("Expected Conflict, got {:?}", other),
    }

    let stored = queue.get("dup").await.unwrap().unwrap();
    assert_eq!(stored.command, "echo original");
    assert_eq!(stored.max_retries, original.max_retries);
    assert_eq!(queue.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_completed_is_absorbing() {
    let (_dir, queue) = open_queue().await;
    queue.enqueue(EnqueueRequest::new("j1", "true")).await.unwrap();

    let job = queue.claim("w1").await.unwrap().unwrap();
    queue
        .complete_attempt(&job, "w1", &ExecutionOutcome::Success(String::new()), &RetryPolicy::default())
        .await
        .unwrap();

    assert!(queue.claim("w1").await.unwrap().is_none());
    assert!(matches!(
        queue.retry_dlq_job("j1").await,
        Err(QueueError::InvalidState {
            actual: JobState::Completed,
            ..
        })
    ));

    let status = queue.status().await.unwrap();
    assert_eq!(status.state_counts[&JobState::Completed], 1);
    assert_eq!(status.total, 1);
}
