//! The generation queue: admission, scheduling, and lifecycle.
//!
//! [`GenerationQueue`] owns all queue state and runs two background
//! tasks:
//!
//! - the **scheduler loop**, which launches pending jobs as independent
//!   tokio tasks while the in-flight count is below the concurrency
//!   ceiling, and parks on a [`Notify`] when there is nothing to do;
//! - the **health monitor**, which periodically samples load, adjusts
//!   the ceiling within configured bounds, and cleans up aged terminal
//!   records.
//!
//! All shared state lives behind a single async mutex, so ceiling and
//! queue-membership read-modify-writes are atomic. A job is in the
//! admission queue or in the in-flight set, never both; jobs waiting
//! out a retry delay are in neither but still hold a capacity slot.
//!
//! # Example
//!
//! ```rust,ignore
//! use genqueue::{GenerationQueue, QueueConfig, SimulatedBackend, JobKind, JobPriority};
//! use std::sync::Arc;
//! use serde_json::json;
//!
//! let backend = Arc::new(SimulatedBackend::new());
//! let mut queue = GenerationQueue::new(QueueConfig::default(), backend);
//!
//! let id = queue
//!     .submit(JobKind::Image, JobPriority::High, json!({"prompt": "sunset"}))
//!     .await?;
//! let status = queue.status(id).await?;
//! queue.shutdown().await;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, ExecuteRequest, GenerationBackend, ProgressHandle, ProgressSink};
use crate::config::{ConfigUpdate, QueueConfig};
use crate::error::{CancelError, StatusError, SubmitError};
use crate::job::{Job, JobKind, JobPriority, JobState, JobStatus};
use crate::metrics;
use crate::monitor::{evaluate_scale, LoadSignal, ResourceSampler, ScaleDecision, SyntheticSampler};
use crate::queue::AdmissionQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::{QueueStats, StatsInputs};

/// Floor for the health-check interval; `tokio::time::interval` panics
/// on a zero period.
const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(10);

/// Mutable queue state, guarded by a single lock.
struct CoreState {
    config: QueueConfig,
    pending: AdmissionQueue,
    jobs: HashMap<Uuid, Job>,
    in_flight: HashSet<Uuid>,
    ceiling: usize,
    last_rescale: Option<DateTime<Utc>>,
    /// Timers for jobs waiting out a retry delay, keyed by job id, so
    /// pending retries can be cancelled and observed.
    retry_timers: HashMap<Uuid, JoinHandle<()>>,
    /// Terminal outcomes over the queue's lifetime (survives cleanup).
    terminal_count: u64,
    terminal_ms_total: u64,
}

impl CoreState {
    fn admitted(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| !job.state.is_terminal())
            .count()
    }

    fn publish_gauges(&self) {
        metrics::set_gauges(self.pending.len(), self.in_flight.len(), self.ceiling);
    }
}

/// State shared between the facade and its background tasks.
struct Inner {
    state: Mutex<CoreState>,
    /// Re-arms the scheduler loop on submission, slot release, retry
    /// re-admission, and ceiling increase.
    notify: Notify,
    backend: Arc<dyn GenerationBackend>,
    sampler: Arc<dyn ResourceSampler>,
    /// Guard so only one scale operation is in flight at a time; also
    /// surfaced as the `rescaling` flag in statistics.
    rescaling: AtomicBool,
}

#[async_trait]
impl ProgressSink for Inner {
    async fn report(&self, job_id: Uuid, percent: u8) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.record_progress(percent);
        }
    }
}

/// In-process asynchronous generation job queue.
///
/// Construction spawns the scheduler loop and health monitor, so a
/// `GenerationQueue` must be created inside a tokio runtime. Dropping
/// the queue without calling [`shutdown`](Self::shutdown) leaves the
/// background tasks running until the runtime stops.
pub struct GenerationQueue {
    inner: Arc<Inner>,
    shutdown_tx: broadcast::Sender<()>,
    scheduler_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl GenerationQueue {
    /// Creates a queue with the synthetic resource sampler.
    pub fn new(config: QueueConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        Self::with_sampler(config, backend, Arc::new(SyntheticSampler::default()))
    }

    /// Creates a queue with a custom resource sampler (e.g. real
    /// telemetry in production, a constant in tests).
    pub fn with_sampler(
        config: QueueConfig,
        backend: Arc<dyn GenerationBackend>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        let ceiling = config.base_concurrency;
        let inner = Arc::new(Inner {
            state: Mutex::new(CoreState {
                config,
                pending: AdmissionQueue::new(),
                jobs: HashMap::new(),
                in_flight: HashSet::new(),
                ceiling,
                last_rescale: None,
                retry_timers: HashMap::new(),
                terminal_count: 0,
                terminal_ms_total: 0,
            }),
            notify: Notify::new(),
            backend,
            sampler,
            rescaling: AtomicBool::new(false),
        });

        let (shutdown_tx, _) = broadcast::channel(1);

        let scheduler_handle = tokio::spawn(scheduler_loop(
            Arc::clone(&inner),
            shutdown_tx.subscribe(),
        ));
        let monitor_handle = tokio::spawn(monitor_loop(
            Arc::clone(&inner),
            shutdown_tx.subscribe(),
        ));

        Self {
            inner,
            shutdown_tx,
            scheduler_handle: Some(scheduler_handle),
            monitor_handle: Some(monitor_handle),
        }
    }

    /// Submits a job for execution.
    ///
    /// Returns immediately with the new job's id, or fails fast with
    /// [`SubmitError::CapacityExceeded`] when pending + in-flight jobs
    /// already fill the configured capacity. Never queues-and-blocks.
    pub async fn submit(
        &self,
        kind: JobKind,
        priority: JobPriority,
        payload: serde_json::Value,
    ) -> Result<Uuid, SubmitError> {
        let id = {
            let mut state = self.inner.state.lock().await;
            let admitted = state.admitted();
            if admitted >= state.config.capacity {
                return Err(SubmitError::CapacityExceeded {
                    admitted,
                    capacity: state.config.capacity,
                });
            }

            let job = Job::new(kind, priority, payload, state.config.max_retries);
            let id = job.id;
            state.pending.push(id, priority);
            state.jobs.insert(id, job);

            info!(
                job_id = %id,
                kind = %kind,
                priority = %priority,
                queued = state.pending.len(),
                "job submitted"
            );
            state.publish_gauges();
            id
        };

        self.inner.notify.notify_one();
        Ok(id)
    }

    /// Returns a snapshot of a job's current state.
    pub async fn status(&self, id: Uuid) -> Result<JobStatus, StatusError> {
        let state = self.inner.state.lock().await;
        state
            .jobs
            .get(&id)
            .map(JobStatus::from)
            .ok_or(StatusError::NotFound(id))
    }

    /// Cancels a job that has not started executing.
    ///
    /// Pending jobs are removed from the admission queue (or their
    /// retry timer aborted) and forgotten. Jobs that already started
    /// cannot be cancelled and return
    /// [`CancelError::AlreadyInFlight`].
    pub async fn cancel(&self, id: Uuid) -> Result<(), CancelError> {
        let mut state = self.inner.state.lock().await;
        let Some(job) = state.jobs.get(&id) else {
            return Err(CancelError::NotFound(id));
        };
        if job.state != JobState::Pending {
            return Err(CancelError::AlreadyInFlight(id));
        }

        state.pending.remove(id);
        if let Some(timer) = state.retry_timers.remove(&id) {
            timer.abort();
        }
        state.jobs.remove(&id);
        info!(job_id = %id, "pending job cancelled");
        state.publish_gauges();
        Ok(())
    }

    /// Computes a statistics snapshot from current state.
    pub async fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().await;
        QueueStats::collect(StatsInputs {
            jobs: &state.jobs,
            capacity: state.config.capacity,
            ceiling: state.ceiling,
            in_flight: state.in_flight.len(),
            rescaling: self.inner.rescaling.load(Ordering::SeqCst),
            last_rescale: state.last_rescale,
            terminal_count: state.terminal_count,
            terminal_ms_total: state.terminal_ms_total,
        })
    }

    /// Applies a partial configuration update.
    ///
    /// Takes effect on the next scheduling or monitoring tick; already
    /// admitted jobs keep the `max_retries` they were created with.
    pub async fn update_config(&self, update: ConfigUpdate) {
        let mut state = self.inner.state.lock().await;
        state.config.apply(update);
        debug!(
            capacity = state.config.capacity,
            base_concurrency = state.config.base_concurrency,
            max_concurrency = state.config.max_concurrency,
            "queue configuration updated"
        );
    }

    /// Current concurrency ceiling.
    pub async fn current_ceiling(&self) -> usize {
        self.inner.state.lock().await.ceiling
    }

    /// Stops the scheduler loop and health monitor and aborts pending
    /// retry timers.
    ///
    /// Executions already in flight are not interrupted; they finish in
    /// the background and record their outcome.
    pub async fn shutdown(&mut self) {
        info!("generation queue shutting down");
        // Ignore send error: the background tasks may already be gone
        let _ = self.shutdown_tx.send(());

        {
            let mut state = self.inner.state.lock().await;
            for (_, timer) in state.retry_timers.drain() {
                timer.abort();
            }
        }

        if let Some(handle) = self.scheduler_handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler task panicked during shutdown");
            }
        }
        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "monitor task panicked during shutdown");
            }
        }
        info!("generation queue stopped");
    }
}

/// Scheduler loop: drain eligible work, then park until re-armed.
async fn scheduler_loop(inner: Arc<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    info!("scheduler loop started");
    loop {
        tokio::select! {
            _ = inner.notify.notified() => {}
            _ = shutdown_rx.recv() => {
                info!("scheduler loop stopped");
                break;
            }
        }
        drain(&inner).await;
    }
}

/// Launches pending jobs while there is spare concurrency.
async fn drain(inner: &Arc<Inner>) {
    loop {
        let mut state = inner.state.lock().await;
        if state.in_flight.len() >= state.ceiling {
            break;
        }
        let Some(id) = state.pending.pop_front() else {
            break;
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            // Cancelled between queue and table; nothing to launch
            continue;
        };

        job.mark_processing();
        let request = ExecuteRequest {
            job_id: id,
            kind: job.kind,
            payload: job.payload.clone(),
            attempt: job.retry_count,
        };
        state.in_flight.insert(id);

        info!(
            job_id = %id,
            kind = %request.kind,
            attempt = request.attempt,
            in_flight = state.in_flight.len(),
            ceiling = state.ceiling,
            "job started"
        );
        state.publish_gauges();
        drop(state);

        tokio::spawn(run_job(Arc::clone(inner), id, request));
    }
}

/// Runs one execution attempt and routes its outcome.
///
/// The backend call runs in its own task so a panic inside it is
/// contained and treated as a failed attempt rather than leaking the
/// concurrency slot.
async fn run_job(inner: Arc<Inner>, id: Uuid, request: ExecuteRequest) {
    let started = Instant::now();
    let backend = Arc::clone(&inner.backend);
    let progress = ProgressHandle::new(id, Arc::clone(&inner) as Arc<dyn ProgressSink>);

    let body = tokio::spawn(async move { backend.execute(request, progress).await });
    let outcome = match body.await {
        Ok(result) => result,
        Err(join_err) => Err(BackendError::Failed(format!(
            "execution task aborted: {join_err}"
        ))),
    };
    let elapsed = started.elapsed();

    match outcome {
        Ok(result) => on_completed(&inner, id, result, elapsed).await,
        Err(err) => on_failed(&inner, id, err, elapsed).await,
    }

    // A slot is free either way
    inner.notify.notify_one();
}

async fn on_completed(inner: &Arc<Inner>, id: Uuid, result: String, elapsed: Duration) {
    let mut state = inner.state.lock().await;
    state.in_flight.remove(&id);

    let Some(job) = state.jobs.get_mut(&id) else {
        return;
    };
    let kind = job.kind;
    job.mark_completed(result);

    state.terminal_count += 1;
    state.terminal_ms_total += elapsed.as_millis() as u64;

    info!(
        job_id = %id,
        kind = %kind,
        duration_ms = elapsed.as_millis() as u64,
        "job completed"
    );
    metrics::record_outcome("completed", &kind.to_string(), elapsed.as_secs_f64());
    state.publish_gauges();
}

async fn on_failed(inner: &Arc<Inner>, id: Uuid, err: BackendError, elapsed: Duration) {
    let mut state = inner.state.lock().await;
    state.in_flight.remove(&id);

    let policy = RetryPolicy::new(state.config.retry_delay);
    let decision = match state.jobs.get(&id) {
        Some(job) => policy.evaluate(job),
        None => return,
    };

    match decision {
        RetryDecision::Retry { delay } => {
            let (kind, attempt) = {
                let Some(job) = state.jobs.get_mut(&id) else {
                    return;
                };
                job.mark_retrying(err.to_string());
                (job.kind, job.retry_count)
            };

            warn!(
                job_id = %id,
                kind = %kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "job failed, retry scheduled"
            );

            // Delayed re-admission as a tracked task, so shutdown and
            // cancel can abort it
            let timer_inner = Arc::clone(inner);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                readmit(timer_inner, id).await;
            });
            state.retry_timers.insert(id, timer);
        }
        RetryDecision::GiveUp => {
            let (kind, retries) = {
                let Some(job) = state.jobs.get_mut(&id) else {
                    return;
                };
                job.mark_failed(err.to_string());
                (job.kind, job.retry_count)
            };

            state.terminal_count += 1;
            state.terminal_ms_total += elapsed.as_millis() as u64;

            error!(
                job_id = %id,
                kind = %kind,
                retries,
                error = %err,
                "job failed terminally, retries exhausted"
            );
            metrics::record_outcome("failed", &kind.to_string(), elapsed.as_secs_f64());
        }
    }
    state.publish_gauges();
}

/// Returns a retried job to the admission queue at its original
/// priority, so it competes fairly with new arrivals.
async fn readmit(inner: Arc<Inner>, id: Uuid) {
    {
        let mut state = inner.state.lock().await;
        state.retry_timers.remove(&id);

        let Some(job) = state.jobs.get(&id) else {
            return;
        };
        if job.state != JobState::Pending || state.pending.contains(id) {
            return;
        }
        let priority = job.priority;

        state.pending.push(id, priority);
        debug!(job_id = %id, "job re-admitted after retry delay");
        state.publish_gauges();
    }
    inner.notify.notify_one();
}

/// Health monitor: sample load, adjust the ceiling, clean up old
/// terminal records.
async fn monitor_loop(inner: Arc<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut current_interval = {
        let state = inner.state.lock().await;
        state.config.health_check_interval.max(MIN_HEALTH_INTERVAL)
    };
    let mut tick = tokio::time::interval(current_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a fresh interval fires immediately
    tick.tick().await;

    info!(
        interval_ms = current_interval.as_millis() as u64,
        "health monitor started"
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {
                health_tick(&inner).await;

                // Pick up interval reconfiguration on the next tick
                let configured = {
                    let state = inner.state.lock().await;
                    state.config.health_check_interval.max(MIN_HEALTH_INTERVAL)
                };
                if configured != current_interval {
                    current_interval = configured;
                    tick = tokio::time::interval(current_interval);
                    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    tick.tick().await;
                }
            }
            _ = shutdown_rx.recv() => {
                info!("health monitor stopped");
                break;
            }
        }
    }
}

async fn health_tick(inner: &Arc<Inner>) {
    // Only one scale operation may be in flight at a time
    if inner.rescaling.swap(true, Ordering::SeqCst) {
        return;
    }

    let (load, ceiling, config) = {
        let state = inner.state.lock().await;
        let admitted = state.admitted();
        let utilization = if state.config.capacity > 0 {
            admitted as f64 / state.config.capacity as f64
        } else {
            0.0
        };
        let in_flight_fraction = if state.ceiling > 0 {
            state.in_flight.len() as f64 / state.ceiling as f64
        } else {
            0.0
        };
        (
            LoadSignal {
                utilization,
                in_flight_fraction,
            },
            state.ceiling,
            state.config.clone(),
        )
    };

    let pressure = inner.sampler.sample(load).await;
    let decision = evaluate_scale(load, pressure, ceiling, &config);

    let mut raised = false;
    {
        let mut state = inner.state.lock().await;
        match decision {
            ScaleDecision::Up(target) => {
                info!(
                    from = state.ceiling,
                    to = target,
                    utilization = load.utilization,
                    pressure,
                    "scaling up concurrency ceiling"
                );
                state.ceiling = target;
                state.last_rescale = Some(Utc::now());
                raised = true;
            }
            ScaleDecision::Down(target) => {
                info!(
                    from = state.ceiling,
                    to = target,
                    utilization = load.utilization,
                    pressure,
                    "scaling down concurrency ceiling"
                );
                state.ceiling = target;
                state.last_rescale = Some(Utc::now());
            }
            ScaleDecision::Hold => {}
        }

        // Keep the ceiling inside bounds even after a config update
        // moved them
        state.ceiling = state
            .ceiling
            .max(state.config.base_concurrency)
            .min(state.config.max_concurrency);

        cleanup_terminal(&mut state);
        state.publish_gauges();
    }
    inner.rescaling.store(false, Ordering::SeqCst);

    if raised {
        // Use the new capacity right away instead of waiting for the
        // next submission
        inner.notify.notify_one();
    }
}

/// Drops terminal records older than the retention window.
fn cleanup_terminal(state: &mut CoreState) {
    let cutoff = Utc::now() - chrono::Duration::milliseconds(state.config.retention.as_millis() as i64);
    let before = state.jobs.len();
    state.jobs.retain(|_, job| {
        !(job.state.is_terminal() && job.completed_at.map(|t| t < cutoff).unwrap_or(false))
    });
    let removed = before - state.jobs.len();
    if removed > 0 {
        debug!(removed, "cleaned up terminal job records");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use serde_json::json;

    fn test_config() -> QueueConfig {
        QueueConfig::new(4)
            .with_base_concurrency(1)
            .with_max_concurrency(2)
            .with_retry_delay(Duration::from_millis(20))
            .with_health_check_interval(Duration::from_millis(50))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_returns_id_and_tracks_job() {
        let backend = Arc::new(SimulatedBackend::new().with_time_scale(0.0));
        let mut queue = GenerationQueue::new(test_config(), backend);

        let id = queue
            .submit(JobKind::Image, JobPriority::Medium, json!({}))
            .await
            .expect("submit should succeed");

        let status = queue.status(id).await.expect("job should be tracked");
        assert_eq!(status.id, id);
        assert!(!status.state.is_terminal() || status.result.is_some());

        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_unknown_job_not_found() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut queue = GenerationQueue::new(test_config(), backend);

        let err = queue.status(Uuid::new_v4()).await.expect_err("unknown id");
        assert!(matches!(err, StatusError::NotFound(_)));

        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_unknown_job_not_found() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut queue = GenerationQueue::new(test_config(), backend);

        let err = queue.cancel(Uuid::new_v4()).await.expect_err("unknown id");
        assert!(matches!(err, CancelError::NotFound(_)));

        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_update_config_applies() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut queue = GenerationQueue::new(test_config(), backend);

        queue
            .update_config(ConfigUpdate::new().capacity(99))
            .await;

        let stats = queue.stats().await;
        assert_eq!(stats.capacity, 99);

        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ceiling_starts_at_base() {
        let backend = Arc::new(SimulatedBackend::new());
        let mut queue = GenerationQueue::new(test_config(), backend);

        assert_eq!(queue.current_ceiling().await, 1);

        queue.shutdown().await;
    }
}
