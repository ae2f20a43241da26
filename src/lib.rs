//! genqueue: asynchronous generation job queue.
//!
//! An in-process scheduler for heterogeneous "generate an asset" jobs:
//! priority-ordered admission with a capacity bound, a concurrency
//! ceiling that adapts to observed load, delayed retries, and queue
//! statistics for observability. The HTTP layer that submits jobs and
//! the real generation service are external collaborators; the latter
//! plugs in through the [`GenerationBackend`] trait.

pub mod backend;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod monitor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod stats;

// Re-export the types most callers need
pub use backend::{
    BackendError, ExecuteRequest, GenerationBackend, ProgressHandle, ProgressSink,
    SimulatedBackend,
};
pub use config::{ConfigUpdate, QueueConfig};
pub use error::{CancelError, StatusError, SubmitError};
pub use job::{Job, JobKind, JobPriority, JobState, JobStatus};
pub use monitor::{LoadSignal, ResourceSampler, SyntheticSampler};
pub use queue::AdmissionQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::GenerationQueue;
pub use stats::QueueStats;
