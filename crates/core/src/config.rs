//! Execution tuning configuration.
//!
//! Every threshold the scheduler, controller, and retry orchestrator use
//! lives here as a named field so deployments can tune behavior without
//! code changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for one execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Floor for the adaptive concurrency limit
    pub min_concurrency: usize,

    /// Starting concurrency limit
    pub initial_concurrency: usize,

    /// Ceiling for the adaptive concurrency limit
    pub max_concurrency: usize,

    /// p95 collaborator latency above which the limit shrinks
    pub latency_target: Duration,

    /// Number of latency samples kept for the p95 estimate
    pub latency_window: usize,

    /// Multiplier applied when latency exceeds the target
    pub latency_decrease_factor: f64,

    /// Multiplier applied when budget headroom is below the low-water mark
    pub headroom_decrease_factor: f64,

    /// Multiplier applied when neither pressure signal fires
    pub increase_factor: f64,

    /// Budget headroom fraction below which the limit shrinks hard
    pub headroom_low_water: f64,

    /// Interval between controller reconcile passes
    pub reconcile_interval: Duration,

    /// Generation temperatures for attempts 1..=n; the schedule length is
    /// also the automatic attempt ceiling
    pub temperature_schedule: Vec<f64>,

    /// Base delay for exponential retry backoff
    pub backoff_base: Duration,

    /// Hard timeout for one collaborator call
    pub atom_timeout: Duration,

    /// Waves larger than this are split into sequential sub-waves
    pub max_wave_size: usize,

    /// Soft budget cap for the plan
    pub soft_cap: f64,

    /// Hard budget cap for the plan
    pub hard_cap: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_concurrency: 2,
            initial_concurrency: 20,
            max_concurrency: 100,
            latency_target: Duration::from_secs(30),
            latency_window: 256,
            latency_decrease_factor: 0.90,
            headroom_decrease_factor: 0.50,
            increase_factor: 1.05,
            headroom_low_water: 0.10,
            reconcile_interval: Duration::from_secs(30),
            temperature_schedule: vec![0.7, 0.5, 0.3],
            backoff_base: Duration::from_secs(1),
            atom_timeout: Duration::from_secs(120),
            max_wave_size: 100,
            soft_cap: 50.0,
            hard_cap: 100.0,
        }
    }
}

impl ExecutionConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency bounds (min, initial, max).
    pub fn with_concurrency(mut self, min: usize, initial: usize, max: usize) -> Self {
        self.min_concurrency = min;
        self.initial_concurrency = initial;
        self.max_concurrency = max;
        self
    }

    /// Set the budget caps.
    pub fn with_caps(mut self, soft: f64, hard: f64) -> Self {
        self.soft_cap = soft;
        self.hard_cap = hard;
        self
    }

    /// Set the per-atom execution timeout.
    pub fn with_atom_timeout(mut self, timeout: Duration) -> Self {
        self.atom_timeout = timeout;
        self
    }

    /// Set the backoff base delay.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the wave size ceiling.
    pub fn with_max_wave_size(mut self, size: usize) -> Self {
        self.max_wave_size = size;
        self
    }

    /// Automatic attempt ceiling, derived from the temperature schedule.
    pub fn max_attempts(&self) -> u32 {
        self.temperature_schedule.len() as u32
    }

    /// Temperature for the given 1-based attempt number, if allowed.
    pub fn temperature_for_attempt(&self, attempt: u32) -> Option<f64> {
        if attempt == 0 {
            return None;
        }
        self.temperature_schedule.get(attempt as usize - 1).copied()
    }

    /// Exponential backoff delay for the given 1-based attempt number.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base * 2u32.pow(exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_temperature_schedule() {
        let config = ExecutionConfig::default();
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.temperature_for_attempt(1), Some(0.7));
        assert_eq!(config.temperature_for_attempt(2), Some(0.5));
        assert_eq!(config.temperature_for_attempt(3), Some(0.3));
        assert_eq!(config.temperature_for_attempt(4), None);
        assert_eq!(config.temperature_for_attempt(0), None);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = ExecutionConfig::default().with_backoff_base(Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn builders_apply_fields() {
        let config = ExecutionConfig::new()
            .with_concurrency(1, 5, 10)
            .with_caps(2.0, 4.0)
            .with_max_wave_size(25)
            .with_atom_timeout(Duration::from_secs(9));
        assert_eq!(config.initial_concurrency, 5);
        assert_eq!(config.hard_cap, 4.0);
        assert_eq!(config.max_wave_size, 25);
        assert_eq!(config.atom_timeout, Duration::from_secs(9));
    }
}
