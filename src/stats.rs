//! Queue-wide statistics.
//!
//! [`QueueStats`] is a read-only projection recomputed on demand from
//! the job table and scheduler bookkeeping; it never mutates anything
//! and is cheap enough to build on every status poll.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::job::{Job, JobState};

/// Snapshot of queue-wide metrics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Jobs waiting for a slot (queued or waiting out a retry delay).
    pub pending: usize,
    /// Jobs currently executing.
    pub processing: usize,
    /// Retained jobs that completed successfully.
    pub completed: usize,
    /// Retained jobs that terminally failed.
    pub failed: usize,
    /// Jobs currently counted against the concurrency ceiling.
    pub in_flight: usize,
    /// Configured admission capacity.
    pub capacity: usize,
    /// Admitted jobs divided by capacity, in [0, 1].
    pub utilization: f64,
    /// Mean wait of pending jobs since submission, in milliseconds.
    pub average_wait_ms: u64,
    /// Running mean execution duration over all terminal jobs, in
    /// milliseconds. Survives terminal-record cleanup.
    pub average_processing_ms: u64,
    /// Current concurrency ceiling.
    pub ceiling: usize,
    /// Whether a scale operation is in progress right now.
    pub rescaling: bool,
    /// When the ceiling last moved.
    pub last_rescale: Option<DateTime<Utc>>,
}

/// Raw scheduler state a stats snapshot is computed from.
pub(crate) struct StatsInputs<'a> {
    pub jobs: &'a HashMap<Uuid, Job>,
    pub capacity: usize,
    pub ceiling: usize,
    pub in_flight: usize,
    pub rescaling: bool,
    pub last_rescale: Option<DateTime<Utc>>,
    /// Terminal outcomes recorded over the queue's lifetime.
    pub terminal_count: u64,
    /// Total execution milliseconds across those outcomes.
    pub terminal_ms_total: u64,
}

impl QueueStats {
    /// Computes a snapshot from the current scheduler state.
    pub(crate) fn collect(inputs: StatsInputs<'_>) -> Self {
        let mut pending = 0usize;
        let mut processing = 0usize;
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut wait_ms_total = 0u64;

        let now = Utc::now();
        for job in inputs.jobs.values() {
            match job.state {
                JobState::Pending => {
                    pending += 1;
                    let waited = (now - job.created_at).num_milliseconds().max(0) as u64;
                    wait_ms_total += waited;
                }
                JobState::Processing => processing += 1,
                JobState::Completed => completed += 1,
                JobState::Failed => failed += 1,
            }
        }

        let admitted = pending + processing;
        let utilization = if inputs.capacity > 0 {
            admitted as f64 / inputs.capacity as f64
        } else {
            0.0
        };
        let average_wait_ms = if pending > 0 {
            wait_ms_total / pending as u64
        } else {
            0
        };
        let average_processing_ms = if inputs.terminal_count > 0 {
            inputs.terminal_ms_total / inputs.terminal_count
        } else {
            0
        };

        Self {
            pending,
            processing,
            completed,
            failed,
            in_flight: inputs.in_flight,
            capacity: inputs.capacity,
            utilization,
            average_wait_ms,
            average_processing_ms,
            ceiling: inputs.ceiling,
            rescaling: inputs.rescaling,
            last_rescale: inputs.last_rescale,
        }
    }

    /// Number of jobs currently counted against capacity.
    pub fn admitted(&self) -> usize {
        self.pending + self.processing
    }

    /// Retained terminal jobs (completed + failed).
    pub fn terminal(&self) -> usize {
        self.completed + self.failed
    }

    /// Share of retained terminal jobs that completed successfully, as
    /// a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.terminal();
        if total == 0 {
            return 0.0;
        }
        (self.completed as f64 / total as f64) * 100.0
    }
}
