//! The store trait every queue participant talks through.
//!
//! The store is the only coordinator between producers, workers, and
//! administrative commands; there is no shared in-memory state. Implementers
//! provide transactional semantics for the compound operations:
//!
//! - `enqueue` bumps the aging counter of every waiting job in the same
//!   transaction as the insert.
//! - `acquire` must be a conditional update whose predicate re-checks that
//!   the row is still claimable (never select-then-update), so two workers
//!   can never hold the same job.
//! - `fail` reads the job, applies [`RetryDecision`], and writes the result
//!   in one transaction.
//!
//! [`RetryDecision`]: crate::retry::RetryDecision

use anyhow::Result;

use crate::job::{Job, JobState, NewJob, QueueStats};

/// Durable, concurrency-safe persistence of jobs and configuration.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in the `pending` state.
    ///
    /// Missing optional fields are filled from the config table (for
    /// `max_retries` / `backoff_base`) or the built-in defaults. Every job
    /// currently waiting (unlocked `pending` or `failed`) has its
    /// `waiting_time` incremented by one in the same transaction.
    ///
    /// Fails with [`QueueError::DuplicateId`] on an id collision and with
    /// [`QueueError::Invalid`] on rejected fields; neither mutates state.
    ///
    /// [`QueueError::DuplicateId`]: crate::error::QueueError::DuplicateId
    /// [`QueueError::Invalid`]: crate::error::QueueError::Invalid
    async fn enqueue(&self, job: NewJob) -> Result<()>;

    /// Atomically claim the highest-ranked eligible job for `worker_id`.
    ///
    /// Eligible: unlocked and `pending`, unlocked and `failed` with
    /// `next_retry_at` in the past, or `processing` with an expired lease.
    /// Ranking: `(priority + waiting_time)` descending, then `created_at`
    /// ascending. Returns `None` when nothing is claimable (including when a
    /// concurrent worker won the race).
    async fn acquire(&self, worker_id: &str) -> Result<Option<Job>>;

    /// Record a successful attempt: `completed`, output and timing stored,
    /// lock cleared, attempt counted. Repeated calls are no-ops.
    async fn complete(&self, job_id: &str, output: &str, execution_time: f64) -> Result<()>;

    /// Record a failed attempt and route it: exponential backoff while the
    /// retry budget lasts, dead-letter once `attempts` reaches
    /// `max_retries`. A missing job is a no-op.
    async fn fail(&self, job_id: &str, error_message: &str, execution_time: f64) -> Result<()>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Jobs ordered by `created_at` descending, optionally filtered by
    /// state.
    async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Remove one job. Returns whether a row was deleted.
    async fn delete(&self, job_id: &str) -> Result<bool>;

    /// Remove every job. Returns the number of rows deleted.
    async fn clear_all(&self) -> Result<u64>;

    /// Reset a dead job to a runnable `pending` state: `attempts` zeroed,
    /// error and retry schedule cleared, lock cleared. Does not bump aging
    /// counters. Fails with [`QueueError::NotFound`] /
    /// [`QueueError::NotDead`].
    ///
    /// [`QueueError::NotFound`]: crate::error::QueueError::NotFound
    /// [`QueueError::NotDead`]: crate::error::QueueError::NotDead
    async fn dlq_retry(&self, job_id: &str) -> Result<()>;

    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    /// Upsert a configuration key.
    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// The dead-letter queue: every job whose retry budget is exhausted.
    async fn dlq_list(&self) -> Result<Vec<Job>> {
        self.list(Some(JobState::Dead)).await
    }
}
