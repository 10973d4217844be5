//! Poll-acquire-execute worker loop.
//!
//! A worker owns a unique id, polls the store for work, runs each job's
//! command through [`run_attempt`], and reports the outcome back. Polling
//! cadence is fixed at one second; an idle worker prints a heartbeat every
//! ten polls so a foreground run shows signs of life.
//!
//! Shutdown is cooperative: flipping the watch channel lets the in-flight
//! job finish and then exits the loop. A worker never force-unlocks a job —
//! recovery of rows orphaned by a killed worker is the store's business.
//!
//! [`run_attempt`]: crate::exec::run_attempt

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crate::exec::{run_attempt, AttemptOutcome};
use crate::job::Job;
use crate::retry::backoff_delay_secs;
use crate::store::JobStore;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const IDLE_HEARTBEAT_POLLS: u64 = 10;

/// Create the shutdown signal pair for one or more workers.
///
/// Send `true` to ask every holder of the receiver to stop after its
/// current job.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// A single worker process's poll-execute loop.
pub struct Worker {
    worker_id: String,
    store: Arc<dyn JobStore>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Worker with a generated `worker-<hex>` id.
    pub fn new(store: Arc<dyn JobStore>, shutdown: watch::Receiver<bool>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::with_id(format!("worker-{}", &suffix[..8]), store, shutdown)
    }

    /// Worker with a caller-chosen id (the process manager hands out
    /// sequential names).
    pub fn with_id(
        worker_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until the shutdown channel flips. Consumes the worker.
    pub async fn run(mut self) {
        println!(
            "[{}] worker started (pid {})",
            self.worker_id,
            std::process::id()
        );

        let mut idle_polls: u64 = 0;
        while !*self.shutdown.borrow() {
            match self.store.acquire(&self.worker_id).await {
                Ok(Some(job)) => {
                    idle_polls = 0;
                    self.execute(job).await;
                }
                Ok(None) => {
                    idle_polls += 1;
                    if idle_polls % IDLE_HEARTBEAT_POLLS == 0 {
                        println!(
                            "[{}] waiting for jobs... ({idle_polls}s elapsed)",
                            self.worker_id
                        );
                    }
                    self.idle_wait().await;
                }
                Err(e) => {
                    tracing::warn!(worker_id = %self.worker_id, error = %e, "acquire failed");
                    eprintln!("[{}] error acquiring job: {e:#}", self.worker_id);
                    self.idle_wait().await;
                }
            }
        }

        println!("[{}] worker stopped", self.worker_id);
    }

    /// Sleep one poll interval, waking early if shutdown is requested.
    async fn idle_wait(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn execute(&self, job: Job) {
        println!(
            "[{}] starting job '{}' (attempt {}/{}, priority {}, timeout {}s): {}",
            self.worker_id,
            job.id,
            job.attempts + 1,
            job.max_retries,
            job.priority,
            job.timeout,
            job.command
        );

        match run_attempt(&job.command, job.timeout).await {
            AttemptOutcome::Succeeded { stdout, elapsed } => {
                println!(
                    "[{}] job '{}' completed in {elapsed:.3}s",
                    self.worker_id, job.id
                );
                if let Err(e) = self.store.complete(&job.id, &stdout, elapsed).await {
                    tracing::warn!(worker_id = %self.worker_id, job_id = %job.id, error = %e, "complete failed");
                    eprintln!("[{}] error completing job '{}': {e:#}", self.worker_id, job.id);
                }
            }
            outcome => {
                let elapsed = outcome.elapsed();
                let message = outcome.error_message().unwrap_or_default();
                let attempts_after = job.attempts + 1;
                if attempts_after >= job.max_retries {
                    println!(
                        "[{}] job '{}' failed in {elapsed:.3}s: {message} (moving to DLQ)",
                        self.worker_id, job.id
                    );
                } else {
                    let delay = backoff_delay_secs(job.backoff_base, attempts_after);
                    println!(
                        "[{}] job '{}' failed in {elapsed:.3}s: {message} (retry {}/{} in {delay}s)",
                        self.worker_id,
                        job.id,
                        attempts_after + 1,
                        job.max_retries
                    );
                }
                if let Err(e) = self.store.fail(&job.id, &message, elapsed).await {
                    tracing::warn!(worker_id = %self.worker_id, job_id = %job.id, error = %e, "fail failed");
                    eprintln!("[{}] error failing job '{}': {e:#}", self.worker_id, job.id);
                }
            }
        }
    }
}
