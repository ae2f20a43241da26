//! Error types for queue operations.
//!
//! Admission-time errors are returned synchronously to the caller.
//! Execution-time failures never appear here: they are absorbed by the
//! retry policy and surface only as a terminal `Failed` job state with
//! the last error preserved.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by job submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The queue is full. The caller must retry later; the core never
    /// queues-and-blocks on admission.
    #[error("queue capacity exceeded: {admitted} of {capacity} slots admitted")]
    CapacityExceeded {
        /// Jobs currently counted against capacity (pending + in-flight).
        admitted: usize,
        /// Configured admission capacity.
        capacity: usize,
    },
}

/// Errors returned by status lookups.
#[derive(Debug, Error)]
pub enum StatusError {
    /// No job with this id is tracked (never submitted, or its terminal
    /// record aged out of the retention window).
    #[error("job {0} not found")]
    NotFound(Uuid),
}

/// Errors returned by cancellation.
#[derive(Debug, Error)]
pub enum CancelError {
    /// No job with this id is tracked.
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// The job already started executing (it may have finished).
    /// Cancelling in-flight work is not supported.
    #[error("job {0} is already in flight and cannot be cancelled")]
    AlreadyInFlight(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SubmitError::CapacityExceeded {
            admitted: 10,
            capacity: 10,
        };
        assert!(err.to_string().contains("capacity exceeded"));
        assert!(err.to_string().contains("10"));

        let id = Uuid::new_v4();
        let err = StatusError::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));

        let err = CancelError::AlreadyInFlight(id);
        assert!(err.to_string().contains("in flight"));
    }
}
