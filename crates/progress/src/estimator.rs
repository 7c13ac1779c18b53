//! Completion time estimation from measured atom durations.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Rolling-average ETA estimator.
///
/// Fed one duration per completed atom; the estimate assumes remaining
/// atoms take the average observed duration and run `concurrency` at a
/// time. Rough by construction, like all ETAs.
#[derive(Debug)]
pub struct EtaEstimator {
    durations: VecDeque<Duration>,
    window: usize,
}

impl EtaEstimator {
    /// Create an estimator keeping the last `window` samples.
    pub fn new(window: usize) -> Self {
        Self {
            durations: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
        }
    }

    /// Record one completed atom's duration.
    pub fn record(&mut self, duration: Duration) {
        if self.durations.len() == self.window {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    /// Mean observed duration, if any samples exist.
    pub fn average(&self) -> Option<Duration> {
        if self.durations.is_empty() {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        Some(total / self.durations.len() as u32)
    }

    /// Estimated time still needed for `remaining` atoms at the given
    /// concurrency.
    pub fn remaining_duration(&self, remaining: usize, concurrency: usize) -> Option<Duration> {
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let average = self.average()?;
        let lanes = concurrency.max(1) as u32;
        let rounds = (remaining as u32).div_ceil(lanes);
        Some(average * rounds)
    }

    /// Estimated completion timestamp for `remaining` atoms.
    pub fn eta(&self, remaining: usize, concurrency: usize) -> Option<DateTime<Utc>> {
        let left = self.remaining_duration(remaining, concurrency)?;
        let left = chrono::Duration::from_std(left).ok()?;
        Some(Utc::now() + left)
    }
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_no_estimate() {
        let estimator = EtaEstimator::new(8);
        assert!(estimator.average().is_none());
        assert!(estimator.remaining_duration(5, 2).is_none());
    }

    #[test]
    fn zero_remaining_is_done() {
        let estimator = EtaEstimator::new(8);
        assert_eq!(estimator.remaining_duration(0, 4), Some(Duration::ZERO));
    }

    #[test]
    fn average_over_window() {
        let mut estimator = EtaEstimator::new(2);
        estimator.record(Duration::from_secs(10));
        estimator.record(Duration::from_secs(2));
        estimator.record(Duration::from_secs(4));
        // First sample aged out of the window.
        assert_eq!(estimator.average(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn remaining_scales_with_concurrency() {
        let mut estimator = EtaEstimator::new(8);
        estimator.record(Duration::from_secs(6));

        assert_eq!(
            estimator.remaining_duration(10, 1),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            estimator.remaining_duration(10, 5),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            estimator.remaining_duration(11, 5),
            Some(Duration::from_secs(18))
        );
    }
}
