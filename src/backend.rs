//! Generation backend boundary.
//!
//! The scheduler drives work through the [`GenerationBackend`] trait:
//! given an [`ExecuteRequest`], the backend reports progress through a
//! [`ProgressHandle`] and eventually settles to a result handle or a
//! [`BackendError`]. A backend must tolerate being invoked repeatedly
//! with the same job id and payload — retried attempts reuse both.
//!
//! [`SimulatedBackend`] stands in for the real generation service. It
//! sleeps through a per-kind number of steps and fails with a
//! configurable probability, purely to exercise the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::job::JobKind;

/// Errors a generation backend can settle with.
///
/// All variants are treated as transient by the scheduler and routed
/// through the retry policy.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The generation attempt itself failed.
    #[error("generation failed: {0}")]
    Failed(String),

    /// The backend could not be reached or refused the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Everything a backend needs to run one attempt of a job.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Identifier of the job being executed.
    pub job_id: Uuid,
    /// Kind of asset to generate.
    pub kind: JobKind,
    /// Caller-supplied generation parameters, identical across retries.
    pub payload: serde_json::Value,
    /// Zero-based attempt number (0 on first execution).
    pub attempt: u32,
}

/// Destination for progress reports.
///
/// Implemented by the scheduler (writing into the job record) and by
/// test doubles.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Records a progress value in [0, 100] for the given job.
    async fn report(&self, job_id: Uuid, percent: u8);
}

/// Handle a backend uses to publish progress for one job.
///
/// Values are clamped to 100; the receiving job record additionally
/// enforces monotonic non-decrease within an attempt.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: Uuid,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressHandle {
    /// Creates a handle reporting for `job_id` into `sink`.
    pub fn new(job_id: Uuid, sink: Arc<dyn ProgressSink>) -> Self {
        Self { job_id, sink }
    }

    /// Publishes a progress percentage.
    pub async fn report(&self, percent: u8) {
        self.sink.report(self.job_id, percent.min(100)).await;
    }
}

/// The unit-of-work contract between the scheduler and the generation
/// service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Runs one attempt of a job to completion.
    ///
    /// On success returns an opaque handle to the generated asset.
    /// Failures are absorbed by the scheduler's retry policy and never
    /// propagate past it.
    async fn execute(
        &self,
        request: ExecuteRequest,
        progress: ProgressHandle,
    ) -> Result<String, BackendError>;
}

/// Per-kind simulation parameters.
fn simulation_profile(kind: JobKind) -> (u32, Duration) {
    match kind {
        JobKind::Image => (10, Duration::from_millis(60)),
        JobKind::Video => (20, Duration::from_millis(150)),
    }
}

/// Simulated generation backend.
///
/// Sleeps through a fixed number of steps per kind, reporting progress
/// after each step, then settles. A payload `"hd": true` stretches each
/// step by 50%. Each attempt fails independently with probability
/// `failure_rate`, at a step chosen at random.
pub struct SimulatedBackend {
    failure_rate: f64,
    time_scale: f64,
    fail_next: AtomicBool,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Creates a backend that never fails and runs at nominal speed.
    pub fn new() -> Self {
        Self {
            failure_rate: 0.0,
            time_scale: 1.0,
            fail_next: AtomicBool::new(false),
        }
    }

    /// Sets the probability that any single attempt fails. Clamped to
    /// [0, 1].
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Scales every simulated delay; useful to shrink test runtimes.
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Forces the next attempt to fail, regardless of `failure_rate`.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn step_delay(&self, kind: JobKind, hd: bool) -> Duration {
        let (_, base) = simulation_profile(kind);
        let mut millis = base.as_millis() as f64 * self.time_scale;
        if hd {
            millis *= 1.5;
        }
        Duration::from_millis(millis as u64)
    }

    fn pick_failure_step(&self, steps: u32) -> Option<u32> {
        use rand::RngExt;

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Some(1);
        }
        if self.failure_rate <= 0.0 {
            return None;
        }
        let mut rng = rand::rng();
        if rng.random_bool(self.failure_rate) {
            Some(rng.random_range(1..=steps))
        } else {
            None
        }
    }
}

#[async_trait]
impl GenerationBackend for SimulatedBackend {
    async fn execute(
        &self,
        request: ExecuteRequest,
        progress: ProgressHandle,
    ) -> Result<String, BackendError> {
        let (steps, _) = simulation_profile(request.kind);
        let hd = request
            .payload
            .get("hd")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let delay = self.step_delay(request.kind, hd);
        let fail_at = self.pick_failure_step(steps);

        debug!(
            job_id = %request.job_id,
            kind = %request.kind,
            attempt = request.attempt,
            steps,
            hd,
            "simulated generation started"
        );

        for step in 1..=steps {
            tokio::time::sleep(delay).await;

            if fail_at == Some(step) {
                return Err(BackendError::Failed(format!(
                    "simulated {} generation failed at step {}/{}",
                    request.kind, step, steps
                )));
            }

            let percent = ((step * 100) / steps) as u8;
            progress.report(percent).await;
        }

        Ok(format!("asset://{}/{}", request.kind, request.job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Sink that records every reported value.
    struct RecordingSink {
        reports: Mutex<Vec<u8>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reports: Mutex::new(Vec::new()),
            })
        }

        fn reports(&self) -> Vec<u8> {
            self.reports.lock().expect("sink lock").clone()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, _job_id: Uuid, percent: u8) {
            self.reports.lock().expect("sink lock").push(percent);
        }
    }

    fn request(kind: JobKind, payload: serde_json::Value) -> ExecuteRequest {
        ExecuteRequest {
            job_id: Uuid::new_v4(),
            kind,
            payload,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn test_successful_run_reports_full_progress() {
        let backend = SimulatedBackend::new().with_time_scale(0.0);
        let sink = RecordingSink::new();
        let req = request(JobKind::Image, json!({}));
        let handle = ProgressHandle::new(req.job_id, sink.clone());

        let result = backend.execute(req, handle).await.expect("should succeed");

        assert!(result.starts_with("asset://image/"));
        let reports = sink.reports();
        assert_eq!(reports.len(), 10);
        assert_eq!(*reports.last().expect("non-empty"), 100);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_video_runs_more_steps_than_image() {
        let backend = SimulatedBackend::new().with_time_scale(0.0);
        let sink = RecordingSink::new();
        let req = request(JobKind::Video, json!({}));
        let handle = ProgressHandle::new(req.job_id, sink.clone());

        backend.execute(req, handle).await.expect("should succeed");

        assert_eq!(sink.reports().len(), 20);
    }

    #[tokio::test]
    async fn test_fail_next_forces_failure() {
        let backend = SimulatedBackend::new().with_time_scale(0.0);
        backend.fail_next();

        let sink = RecordingSink::new();
        let req = request(JobKind::Image, json!({}));
        let handle = ProgressHandle::new(req.job_id, sink.clone());

        let err = backend
            .execute(req, handle)
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("step 1"));

        // The flag is one-shot
        let req = request(JobKind::Image, json!({}));
        let handle = ProgressHandle::new(req.job_id, sink);
        backend
            .execute(req, handle)
            .await
            .expect("second attempt succeeds");
    }

    #[tokio::test]
    async fn test_guaranteed_failure_rate() {
        let backend = SimulatedBackend::new()
            .with_time_scale(0.0)
            .with_failure_rate(1.0);
        let sink = RecordingSink::new();
        let req = request(JobKind::Image, json!({}));
        let handle = ProgressHandle::new(req.job_id, sink);

        assert!(backend.execute(req, handle).await.is_err());
    }

    #[test]
    fn test_hd_flag_stretches_steps() {
        let backend = SimulatedBackend::new();
        let plain = backend.step_delay(JobKind::Image, false);
        let hd = backend.step_delay(JobKind::Image, true);

        assert_eq!(plain, Duration::from_millis(60));
        assert_eq!(hd, Duration::from_millis(90));
    }

    #[test]
    fn test_failure_rate_clamped() {
        let backend = SimulatedBackend::new().with_failure_rate(3.0);
        assert!((backend.failure_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_progress_handle_clamps() {
        let sink = RecordingSink::new();
        let handle = ProgressHandle::new(Uuid::new_v4(), sink.clone());

        handle.report(250).await;

        assert_eq!(sink.reports(), vec![100]);
    }
}
