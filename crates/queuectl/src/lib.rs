//! # queuectl-core
//!
//! The coordination engine behind `queuectl`: a persistent, multi-worker
//! background job queue for shell commands.
//!
//! ## Core Concepts
//!
//! Everything shared between producers, workers, and administrative tooling
//! lives in a single embedded database behind the [`JobStore`] trait:
//! - Producers insert jobs ([`NewJob`]) through [`JobStore::enqueue`].
//! - Workers ([`Worker`]) poll [`JobStore::acquire`], execute the job's shell
//!   command under a wall-clock timeout ([`run_attempt`]), and report the
//!   outcome back through [`JobStore::complete`] / [`JobStore::fail`].
//! - Failed attempts are routed by [`RetryDecision`]: exponential backoff
//!   while the retry budget lasts, dead-letter once it is exhausted.
//!
//! ## Architecture
//!
//! ```text
//! producer ──enqueue──► ┌───────────┐ ◄──acquire── worker 1
//!                       │ JobStore  │ ◄──acquire── worker 2
//! admin CLI ──list/───► │ (SQLite)  │ ◄──acquire── worker N
//!            dlq/config └───────────┘
//!                             ▲
//!                complete / fail (RetryDecision)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Single acquirer** - a job is held by at most one live worker; the
//!    claim is a conditional update on `locked_by IS NULL`, never a
//!    select-then-update.
//! 2. **Lock/state coupling** - `processing` iff `locked_by` and `locked_at`
//!    are set; waiting and terminal states carry no lock.
//! 3. **Bounded attempts** - `attempts` never exceeds `max_retries`; a job
//!    reaches `dead` exactly when a failure lands on the budget boundary.
//! 4. **Terminal stability** - `completed` and `dead` jobs are only touched
//!    by explicit administrative actions.
//!
//! Scheduling is by **effective priority** (`priority + waiting_time`,
//! descending; ties to the oldest `created_at`). The aging counter is bumped
//! for every waiting job each time a new job is enqueued, so long-waiting
//! low-priority jobs cannot starve while the queue is being fed.
//!
//! ## Example
//!
//! ```ignore
//! use queuectl_core::{JobStore, NewJob, Worker, shutdown_channel};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn JobStore> = Arc::new(open_store().await?);
//!
//! store.enqueue(NewJob::new("greet", "echo Hello")).await?;
//!
//! let (stop_tx, stop_rx) = shutdown_channel();
//! let worker = Worker::new(Arc::clone(&store), stop_rx);
//! tokio::spawn(worker.run());
//!
//! // ... later, let the in-flight job finish and wind down:
//! let _ = stop_tx.send(true);
//! ```

// Core modules
mod error;
mod exec;
mod job;
mod retry;
mod store;
mod worker;

// Re-export error types
pub use crate::error::QueueError;

// Re-export the job model
pub use crate::job::{
    Job, JobState, NewJob, QueueStats, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES,
    DEFAULT_PRIORITY, DEFAULT_TIMEOUT_SECS, LEASE_MULTIPLIER,
};

// Re-export retry routing
pub use crate::retry::{backoff_delay_secs, RetryDecision};

// Re-export the store interface
pub use crate::store::JobStore;

// Re-export attempt execution
pub use crate::exec::{run_attempt, AttemptOutcome};

// Re-export the worker loop
pub use crate::worker::{shutdown_channel, Worker};

// Re-export commonly used external types
pub use async_trait::async_trait;
