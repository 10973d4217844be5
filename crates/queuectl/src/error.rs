//! Structured error types for queue operations.
//!
//! `QueueError` covers the failures callers need to distinguish: duplicate
//! ids on enqueue, lookups that miss, and dead-letter retries aimed at jobs
//! that are not dead. Everything else (storage faults, I/O) travels as plain
//! `anyhow::Error` context and is only ever reported, not matched on.
//!
//! Store methods return `anyhow::Result`; callers that care downcast:
//!
//! ```ignore
//! use queuectl_core::QueueError;
//!
//! if let Err(e) = store.enqueue(job).await {
//!     match e.downcast_ref::<QueueError>() {
//!         Some(QueueError::DuplicateId { id }) => eprintln!("job '{id}' already exists"),
//!         _ => eprintln!("enqueue failed: {e:#}"),
//!     }
//! }
//! ```

use thiserror::Error;

use crate::job::JobState;

/// Pattern-matchable failures of queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with this id already exists. Enqueue performs no mutation.
    #[error("job '{id}' already exists")]
    DuplicateId { id: String },

    /// The referenced job does not exist.
    #[error("job '{id}' not found")]
    NotFound { id: String },

    /// Dead-letter retry aimed at a job that is not in the dead state.
    #[error("job '{id}' is '{state}', not 'dead'")]
    NotDead { id: String, state: JobState },

    /// A state string (from the database or a CLI filter) is not a known
    /// lifecycle state.
    #[error("unknown job state '{value}'")]
    InvalidState { value: String },

    /// The job fields failed validation before insert.
    #[error("invalid job: {reason}")]
    Invalid { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_job() {
        let err = QueueError::DuplicateId { id: "j1".into() };
        assert_eq!(err.to_string(), "job 'j1' already exists");

        let err = QueueError::NotDead {
            id: "j2".into(),
            state: JobState::Pending,
        };
        assert_eq!(err.to_string(), "job 'j2' is 'pending', not 'dead'");
    }

    #[test]
    fn downcasts_through_anyhow() {
        let err: anyhow::Error = QueueError::NotFound { id: "gone".into() }.into();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::NotFound { .. })
        ));
    }
}
