//! Load sampling and dynamic scaling policy.
//!
//! The health monitor samples a resource-pressure estimate through the
//! [`ResourceSampler`] seam and combines it with admission-queue
//! utilization to decide whether the concurrency ceiling moves. The
//! scaling rule itself is a pure function ([`evaluate_scale`]) so
//! production deployments can swap in real CPU/memory/network
//! telemetry without touching it.

use async_trait::async_trait;

use crate::config::QueueConfig;

/// Resource pressure above which the monitor considers scaling up.
pub const PRESSURE_SCALE_UP: f64 = 0.7;

/// Resource pressure below which the monitor considers scaling down.
pub const PRESSURE_SCALE_DOWN: f64 = 0.3;

/// Observed load at a monitor tick.
#[derive(Debug, Clone, Copy)]
pub struct LoadSignal {
    /// Admitted jobs divided by configured capacity, in [0, 1].
    pub utilization: f64,
    /// In-flight jobs divided by the current ceiling, in [0, 1].
    pub in_flight_fraction: f64,
}

/// Source of the resource-pressure estimate, in [0, 1].
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    /// Samples current resource pressure given the observed load.
    async fn sample(&self, load: LoadSignal) -> f64;
}

/// Deterministic synthetic pressure estimate with bounded jitter.
///
/// Stands in for real telemetry: pressure tracks how busy the queue
/// already is, plus uniform noise of at most `jitter` either way.
pub struct SyntheticSampler {
    jitter: f64,
}

impl Default for SyntheticSampler {
    fn default() -> Self {
        Self { jitter: 0.05 }
    }
}

impl SyntheticSampler {
    /// Creates a sampler with the given jitter bound. Clamped to [0, 1].
    pub fn with_jitter(jitter: f64) -> Self {
        Self {
            jitter: jitter.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl ResourceSampler for SyntheticSampler {
    async fn sample(&self, load: LoadSignal) -> f64 {
        use rand::RngExt;

        let base = 0.55 * load.in_flight_fraction + 0.35 * load.utilization;
        let noise = if self.jitter > 0.0 {
            rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        (base + noise).clamp(0.0, 1.0)
    }
}

/// Ceiling adjustment chosen at a monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Raise the ceiling to the contained value.
    Up(usize),
    /// Lower the ceiling to the contained value.
    Down(usize),
    /// Leave the ceiling unchanged.
    Hold,
}

/// The scaling rule, mutually exclusive per tick.
///
/// Scale up by `scale_step` (capped at `max_concurrency`) when
/// utilization exceeds the upper threshold and pressure exceeds
/// [`PRESSURE_SCALE_UP`]; scale down by `scale_step` (floored at
/// `base_concurrency`) when utilization falls below the lower threshold
/// and pressure falls below [`PRESSURE_SCALE_DOWN`]; otherwise hold.
pub fn evaluate_scale(
    load: LoadSignal,
    pressure: f64,
    ceiling: usize,
    config: &QueueConfig,
) -> ScaleDecision {
    if load.utilization > config.scale_up_threshold
        && pressure > PRESSURE_SCALE_UP
        && ceiling < config.max_concurrency
    {
        ScaleDecision::Up((ceiling + config.scale_step).min(config.max_concurrency))
    } else if load.utilization < config.scale_down_threshold
        && pressure < PRESSURE_SCALE_DOWN
        && ceiling > config.base_concurrency
    {
        ScaleDecision::Down(
            ceiling
                .saturating_sub(config.scale_step)
                .max(config.base_concurrency),
        )
    } else {
        ScaleDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(utilization: f64, in_flight_fraction: f64) -> LoadSignal {
        LoadSignal {
            utilization,
            in_flight_fraction,
        }
    }

    fn config() -> QueueConfig {
        QueueConfig::default()
            .with_base_concurrency(2)
            .with_max_concurrency(8)
            .with_scale_thresholds(0.8, 0.3)
            .with_scale_step(2)
    }

    #[tokio::test]
    async fn test_synthetic_sampler_stays_in_unit_interval() {
        let sampler = SyntheticSampler::default();

        for (u, f) in [(0.0, 0.0), (0.5, 0.5), (1.0, 1.0)] {
            let pressure = sampler.sample(load(u, f)).await;
            assert!((0.0..=1.0).contains(&pressure), "pressure {pressure}");
        }
    }

    #[tokio::test]
    async fn test_synthetic_sampler_tracks_load() {
        let sampler = SyntheticSampler::with_jitter(0.0);

        let idle = sampler.sample(load(0.0, 0.0)).await;
        let busy = sampler.sample(load(1.0, 1.0)).await;

        assert!(idle < PRESSURE_SCALE_DOWN);
        assert!(busy > PRESSURE_SCALE_UP);
    }

    #[test]
    fn test_scale_up_when_hot() {
        let decision = evaluate_scale(load(0.9, 0.9), 0.85, 4, &config());
        assert_eq!(decision, ScaleDecision::Up(6));
    }

    #[test]
    fn test_scale_up_capped_at_max() {
        let decision = evaluate_scale(load(0.9, 0.9), 0.85, 7, &config());
        assert_eq!(decision, ScaleDecision::Up(8));

        let decision = evaluate_scale(load(0.9, 0.9), 0.85, 8, &config());
        assert_eq!(decision, ScaleDecision::Hold);
    }

    #[test]
    fn test_scale_down_when_idle() {
        let decision = evaluate_scale(load(0.1, 0.0), 0.1, 6, &config());
        assert_eq!(decision, ScaleDecision::Down(4));
    }

    #[test]
    fn test_scale_down_floored_at_base() {
        let decision = evaluate_scale(load(0.1, 0.0), 0.1, 3, &config());
        assert_eq!(decision, ScaleDecision::Down(2));

        let decision = evaluate_scale(load(0.1, 0.0), 0.1, 2, &config());
        assert_eq!(decision, ScaleDecision::Hold);
    }

    #[test]
    fn test_hold_when_signals_disagree() {
        // Utilization high but pressure low: no scale up
        let decision = evaluate_scale(load(0.9, 0.2), 0.4, 4, &config());
        assert_eq!(decision, ScaleDecision::Hold);

        // Utilization low but pressure high: no scale down
        let decision = evaluate_scale(load(0.1, 0.9), 0.9, 4, &config());
        assert_eq!(decision, ScaleDecision::Hold);
    }

    #[test]
    fn test_hold_in_middle_band() {
        let decision = evaluate_scale(load(0.5, 0.5), 0.5, 4, &config());
        assert_eq!(decision, ScaleDecision::Hold);
    }
}
