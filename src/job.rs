//! Job definitions for the generation queue.
//!
//! This module defines the core job types used by the scheduler:
//!
//! - `Job`: a unit of generation work with identity, priority, and lifecycle state
//! - `JobKind`: the kind of asset being generated (drives simulated timing)
//! - `JobPriority`: admission ordering, `Urgent` served first
//! - `JobState`: lifecycle state machine
//! - `JobStatus`: read-only snapshot returned to status pollers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum number of retries before a job is terminally failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Kind of asset a job produces.
///
/// The kind affects the simulated backend's step count and per-step
/// duration; the scheduler itself treats all kinds identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Still image generation.
    Image,
    /// Video generation (longer, more steps).
    Video,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Image => write!(f, "image"),
            JobKind::Video => write!(f, "video"),
        }
    }
}

/// Admission priority of a job.
///
/// Lower values are served first; the derived `Ord` follows declaration
/// order, so `Urgent < High < Medium < Low`. Priority affects admission
/// order only — a lower-priority job already in flight is never
/// pre-empted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Urgent,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPriority::Urgent => write!(f, "urgent"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Medium => write!(f, "medium"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

/// Lifecycle state of a job.
///
/// Transitions are monotonic through `Pending -> Processing ->
/// (Completed | Failed)`, except that a failed attempt below the retry
/// ceiling goes back to `Pending` for re-admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the admission queue, or waiting out a retry delay.
    Pending,
    /// Currently executing.
    Processing,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed after exhausting retries. Terminal.
    Failed,
}

impl JobState {
    /// Returns whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of generation work tracked by the queue.
///
/// The payload is an opaque parameter map owned by the caller; the core
/// never inspects it (the simulated backend reads a single boolean key
/// to nudge timing, nothing else).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, generated at submission.
    pub id: Uuid,
    /// Kind of asset being generated.
    pub kind: JobKind,
    /// Admission priority.
    pub priority: JobPriority,
    /// Caller-owned generation parameters.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub state: JobState,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress percentage in [0, 100], non-decreasing while processing.
    pub progress: u8,
    /// Opaque handle to the generated asset, set on completion.
    pub result: Option<String>,
    /// Description of the most recent failure.
    pub error: Option<String>,
    /// Number of retries consumed so far.
    pub retry_count: u32,
    /// Maximum retries before the job is terminally failed.
    pub max_retries: u32,
}

impl Job {
    /// Creates a new pending job.
    pub fn new(
        kind: JobKind,
        priority: JobPriority,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            payload,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Returns whether a failed attempt should be retried.
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Returns the number of retries still available.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// How long the job has been waiting since submission.
    pub fn wait_time(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Marks the job as executing, stamping the attempt start time.
    pub(crate) fn mark_processing(&mut self) {
        self.state = JobState::Processing;
        self.started_at = Some(Utc::now());
        self.progress = 0;
    }

    /// Records a progress update.
    ///
    /// Only meaningful while processing; values are clamped to 100 and
    /// may never decrease within an attempt.
    pub(crate) fn record_progress(&mut self, percent: u8) {
        if self.state != JobState::Processing {
            return;
        }
        let clamped = percent.min(100);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    /// Marks the job as successfully completed.
    pub(crate) fn mark_completed(&mut self, result: String) {
        self.state = JobState::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Consumes one retry: back to pending with progress reset.
    ///
    /// The failure message is kept so status pollers see why the last
    /// attempt did not finish.
    pub(crate) fn mark_retrying(&mut self, error: String) {
        self.retry_count += 1;
        self.state = JobState::Pending;
        self.progress = 0;
        self.started_at = None;
        self.error = Some(error);
    }

    /// Marks the job as terminally failed.
    pub(crate) fn mark_failed(&mut self, error: String) {
        self.state = JobState::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }
}

/// Read-only snapshot of a job, returned to status pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job identifier.
    pub id: Uuid,
    /// Kind of asset being generated.
    pub kind: JobKind,
    /// Current lifecycle state.
    pub state: JobState,
    /// Progress percentage in [0, 100].
    pub progress: u8,
    /// Result handle, present once completed.
    pub result: Option<String>,
    /// Most recent failure description, if any.
    pub error: Option<String>,
    /// Retries consumed so far.
    pub retry_count: u32,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            state: job.state,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
            retry_count: job.retry_count,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}
