//! End-to-end worker tests: real shell subprocesses against a real store.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use queuectl_core::{shutdown_channel, Job, JobState, JobStore, NewJob, Worker};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::SqliteJobStore;

async fn open_store() -> (SqliteJobStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = SqliteJobStore::open(dir.path().join("queue.db"))
        .await
        .expect("open store");
    (store, dir)
}

fn start_worker(store: &SqliteJobStore) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (stop_tx, stop_rx) = shutdown_channel();
    let worker = Worker::new(Arc::new(store.clone()), stop_rx);
    (stop_tx, tokio::spawn(worker.run()))
}

async fn stop_worker(stop_tx: watch::Sender<bool>, handle: JoinHandle<()>) {
    let _ = stop_tx.send(true);
    tokio::time::timeout(Duration::from_secs(15), handle)
        .await
        .expect("worker did not shut down")
        .expect("worker panicked");
}

async fn wait_for_state(
    store: &SqliteJobStore,
    job_id: &str,
    state: JobState,
    within: Duration,
) -> Job {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let job = store
            .get(job_id)
            .await
            .expect("get job")
            .expect("job exists");
        if job.state == state {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job '{job_id}' is '{}', expected '{state}' within {within:?}",
                job.state
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn completes_a_simple_job() {
    let (store, _dir) = open_store().await;
    store.enqueue(NewJob::new("j1", "echo Hello")).await.unwrap();

    let (stop_tx, handle) = start_worker(&store);
    let job = wait_for_state(&store, "j1", JobState::Completed, Duration::from_secs(5)).await;
    stop_worker(stop_tx, handle).await;

    assert_eq!(job.output.as_deref(), Some("Hello"));
    assert_eq!(job.attempts, 1);
    assert_eq!(job.locked_by, None);
    assert!(job.execution_time.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn records_nonzero_exit_as_a_failed_attempt() {
    let (store, _dir) = open_store().await;
    store
        .enqueue(NewJob::new("j1", "echo broken >&2; exit 3").max_retries(1))
        .await
        .unwrap();

    let (stop_tx, handle) = start_worker(&store);
    let job = wait_for_state(&store, "j1", JobState::Dead, Duration::from_secs(5)).await;
    stop_worker(stop_tx, handle).await;

    assert_eq!(job.attempts, 1);
    assert_eq!(job.error_message.as_deref(), Some("Exit code 3: broken"));
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_retries_then_dead_letters() {
    let (store, _dir) = open_store().await;
    store
        .enqueue(
            NewJob::new("j2", "sleep 30")
                .timeout(1)
                .max_retries(2)
                .backoff_base(2),
        )
        .await
        .unwrap();

    let (stop_tx, handle) = start_worker(&store);
    let job = wait_for_state(&store, "j2", JobState::Dead, Duration::from_secs(20)).await;
    stop_worker(stop_tx, handle).await;

    assert_eq!(job.attempts, 2);
    assert_eq!(job.error_message.as_deref(), Some("Timeout exceeded (1s)"));
    assert_eq!(job.next_retry_at, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_workers_drain_the_queue_without_double_execution() {
    let (store, _dir) = open_store().await;
    for k in 0..5 {
        store
            .enqueue(NewJob::new(format!("job-{k}"), format!("echo {k}")))
            .await
            .unwrap();
    }

    let (stop_a, handle_a) = start_worker(&store);
    let (stop_b, handle_b) = start_worker(&store);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = store.stats().await.unwrap();
        if stats.completed == 5 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue not drained: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    stop_worker(stop_a, handle_a).await;
    stop_worker(stop_b, handle_b).await;

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.completed, 5);

    // Each job ran exactly once.
    for k in 0..5 {
        let job = store.get(&format!("job-{k}")).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.output.as_deref(), Some(format!("{k}").as_str()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn higher_priority_jobs_run_first() {
    let (store, _dir) = open_store().await;
    store.enqueue(NewJob::new("lo", "echo lo").priority(1)).await.unwrap();
    store.enqueue(NewJob::new("hi", "echo hi").priority(10)).await.unwrap();

    let (stop_tx, handle) = start_worker(&store);
    let lo = wait_for_state(&store, "lo", JobState::Completed, Duration::from_secs(10)).await;
    let hi = wait_for_state(&store, "hi", JobState::Completed, Duration::from_secs(10)).await;
    stop_worker(stop_tx, handle).await;

    // The single worker finished the urgent job before touching the other.
    assert!(hi.updated_at < lo.updated_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_waits_for_the_inflight_job() {
    let (store, _dir) = open_store().await;
    store
        .enqueue(NewJob::new("slow", "sleep 2").priority(10).timeout(10))
        .await
        .unwrap();
    store
        .enqueue(NewJob::new("later", "echo later").priority(1))
        .await
        .unwrap();

    let (stop_tx, handle) = start_worker(&store);
    wait_for_state(&store, "slow", JobState::Processing, Duration::from_secs(5)).await;
    stop_worker(stop_tx, handle).await;

    // The in-flight job finished; the queued one was left alone.
    let slow = store.get("slow").await.unwrap().unwrap();
    assert_eq!(slow.state, JobState::Completed);
    assert_eq!(slow.attempts, 1);
    let later = store.get("later").await.unwrap().unwrap();
    assert_eq!(later.state, JobState::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_letter_retry_makes_a_job_runnable_again() {
    let (store, _dir) = open_store().await;
    store
        .enqueue(NewJob::new("j1", "exit 1").max_retries(1))
        .await
        .unwrap();

    let (stop_tx, handle) = start_worker(&store);
    wait_for_state(&store, "j1", JobState::Dead, Duration::from_secs(5)).await;
    stop_worker(stop_tx, handle).await;

    store.dlq_retry("j1").await.unwrap();
    let job = store.get("j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.error_message, None);

    // No worker is running, so it stays queued.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        store.get("j1").await.unwrap().unwrap().state,
        JobState::Pending
    );
}
