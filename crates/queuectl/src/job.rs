//! Job model: lifecycle states, the job record, and queue statistics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::QueueError;

/// Timeout applied when the producer does not supply one, in seconds.
pub const DEFAULT_TIMEOUT_SECS: i64 = 20;

/// Static priority applied when the producer does not supply one.
pub const DEFAULT_PRIORITY: i64 = 5;

/// Retry ceiling used when neither the producer nor the config table supply
/// one.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Exponential backoff base used when neither the producer nor the config
/// table supply one.
pub const DEFAULT_BACKOFF_BASE: i64 = 2;

/// A `processing` row whose `locked_at` is older than this multiple of the
/// job's own `timeout` is considered orphaned and may be re-acquired.
pub const LEASE_MULTIPLIER: i64 = 2;

/// Lifecycle state of a job.
///
/// `Completed` and `Dead` are terminal: jobs there are only mutated by
/// explicit administrative actions (delete, dead-letter retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Waiting for its first execution.
    Pending,
    /// Locked by a worker and executing.
    Processing,
    /// Finished with exit code 0.
    Completed,
    /// Failed a retryable attempt; eligible again once `next_retry_at`
    /// passes.
    Failed,
    /// Retry budget exhausted; parked in the dead-letter queue.
    Dead,
}

impl JobState {
    /// The lowercase wire name used in the database and on the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Terminal states are never scheduled and never aged.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidState {
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Producer-supplied unique identifier.
    pub id: String,
    /// Opaque shell command line.
    pub command: String,
    pub state: JobState,
    /// Completed execution attempts (success or failure).
    pub attempts: i64,
    /// Attempt budget; a failure that lands on this count dead-letters the
    /// job.
    pub max_retries: i64,
    /// Per-attempt wall-clock limit in seconds.
    pub timeout: i64,
    /// Base of the exponential retry delay.
    pub backoff_base: i64,
    /// Static user priority (nominally 1-10, higher runs first).
    pub priority: i64,
    /// Aging counter: how many newer jobs were enqueued while this one was
    /// waiting.
    pub waiting_time: i64,
    /// Earliest instant a failed job may run again.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Worker currently holding the job.
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Captured stdout of the last successful attempt.
    pub output: Option<String>,
    /// Diagnostic from the last failed attempt.
    pub error_message: Option<String>,
    /// Wall-clock duration of the last attempt, in seconds.
    pub execution_time: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Scheduling key: static priority plus the aging counter.
    pub fn effective_priority(&self) -> i64 {
        self.priority + self.waiting_time
    }

    /// Whether the lock on a `processing` row has outlived its lease
    /// horizon (`LEASE_MULTIPLIER` times the job's own timeout).
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Processing
            && self
                .locked_at
                .is_some_and(|t| now - t >= Duration::seconds(LEASE_MULTIPLIER * self.timeout))
    }

    /// Whether an acquire at `now` may claim this job: unlocked and either
    /// pending or past its retry delay, or an orphaned `processing` row
    /// whose lease has expired.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.locked_by.is_none() {
            match self.state {
                JobState::Pending => true,
                JobState::Failed => self.next_retry_at.is_some_and(|t| t <= now),
                _ => false,
            }
        } else {
            self.lease_expired(now)
        }
    }
}

/// Producer-supplied fields for a new job.
///
/// `None` fields are filled at enqueue time: `timeout` and `priority` from
/// the built-in defaults, `max_retries` and `backoff_base` from the config
/// table (falling back to the built-in defaults).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    pub max_retries: Option<i64>,
    pub timeout: Option<i64>,
    pub backoff_base: Option<i64>,
    pub priority: Option<i64>,
}

impl NewJob {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            max_retries: None,
            timeout: None,
            backoff_base: None,
            priority: None,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn timeout(mut self, timeout_secs: i64) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    pub fn max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn backoff_base(mut self, backoff_base: i64) -> Self {
        self.backoff_base = Some(backoff_base);
        self
    }
}

/// Job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
}
