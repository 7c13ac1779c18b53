//! Self-tuning concurrency ceiling for in-flight atom executions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atomflow_core::{ConcurrencySnapshot, ExecutionConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::error::ExecutionError;

/// A held concurrency slot. Dropping the token releases the slot.
pub struct ConcurrencyToken {
    _permit: OwnedSemaphorePermit,
}

struct Limiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// Maintains a live concurrency limit between configured bounds, adjusted
/// from observed collaborator latency and budget headroom.
///
/// Changing the limit replaces the underlying semaphore: tokens already
/// held are unaffected, waiters retry against the new primitive, and only
/// future acquisitions see the new ceiling.
pub struct AdaptiveConcurrencyController {
    limiter: Mutex<Limiter>,
    latencies: Mutex<VecDeque<Duration>>,
    min_limit: usize,
    max_limit: usize,
    latency_target: Duration,
    latency_window: usize,
    latency_decrease_factor: f64,
    headroom_decrease_factor: f64,
    increase_factor: f64,
    headroom_low_water: f64,
}

impl AdaptiveConcurrencyController {
    /// Create a controller from the plan configuration.
    pub fn new(config: &ExecutionConfig) -> Self {
        let initial = config
            .initial_concurrency
            .clamp(config.min_concurrency.max(1), config.max_concurrency);
        Self {
            limiter: Mutex::new(Limiter {
                semaphore: Arc::new(Semaphore::new(initial)),
                limit: initial,
            }),
            latencies: Mutex::new(VecDeque::with_capacity(config.latency_window)),
            min_limit: config.min_concurrency.max(1),
            max_limit: config.max_concurrency.max(1),
            latency_target: config.latency_target,
            latency_window: config.latency_window.max(1),
            latency_decrease_factor: config.latency_decrease_factor,
            headroom_decrease_factor: config.headroom_decrease_factor,
            increase_factor: config.increase_factor,
            headroom_low_water: config.headroom_low_water,
        }
    }

    /// Current concurrency ceiling.
    pub fn current_limit(&self) -> usize {
        self.limiter.lock().unwrap().limit
    }

    /// Wait for a slot, or fail with `Cancelled` when the plan's
    /// cancellation signal trips first.
    pub async fn acquire(&self, cancel: &Cancellation) -> Result<ConcurrencyToken, ExecutionError> {
        loop {
            let semaphore = self.limiter.lock().unwrap().semaphore.clone();
            tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => return Ok(ConcurrencyToken { _permit: permit }),
                    // The semaphore was swapped out by a reconcile pass;
                    // retry against the replacement.
                    Err(_) => continue,
                },
                _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            }
        }
    }

    /// Record one observed collaborator latency sample.
    pub fn record_latency(&self, latency: Duration) {
        let mut latencies = self.latencies.lock().unwrap();
        if latencies.len() == self.latency_window {
            latencies.pop_front();
        }
        latencies.push_back(latency);
    }

    /// Observed p95 latency over the sample window.
    pub fn p95_latency(&self) -> Option<Duration> {
        let latencies = self.latencies.lock().unwrap();
        if latencies.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = latencies.iter().copied().collect();
        sorted.sort();
        let rank = ((sorted.len() as f64 * 0.95).ceil() as usize).max(1) - 1;
        Some(sorted[rank])
    }

    /// One adjustment pass, driven by the reconcile interval.
    ///
    /// Latency pressure shrinks the limit mildly, low budget headroom
    /// shrinks it hard, otherwise the limit creeps up toward the maximum.
    pub fn reconcile(&self, budget_headroom: f64) {
        let p95 = self.p95_latency();

        let factor = if p95.is_some_and(|p| p > self.latency_target) {
            self.latency_decrease_factor
        } else if budget_headroom < self.headroom_low_water {
            self.headroom_decrease_factor
        } else {
            self.increase_factor
        };

        let mut limiter = self.limiter.lock().unwrap();
        let current = limiter.limit;
        let target = ((current as f64 * factor).round() as usize).clamp(self.min_limit, self.max_limit);
        // A mild increase must actually move off small limits.
        let target = if factor > 1.0 && target == current {
            (current + 1).min(self.max_limit)
        } else {
            target
        };

        if target == current {
            debug!(limit = current, "concurrency limit unchanged");
            return;
        }

        let old = std::mem::replace(
            &mut *limiter,
            Limiter {
                semaphore: Arc::new(Semaphore::new(target)),
                limit: target,
            },
        );
        // Wake waiters parked on the old primitive so they re-acquire
        // against the new one.
        old.semaphore.close();

        info!(
            old_limit = current,
            new_limit = target,
            p95_ms = p95.map(|p| p.as_millis() as u64),
            headroom = budget_headroom,
            "concurrency limit adjusted"
        );
    }

    /// Transient view for status reporting and logs.
    pub fn snapshot(&self, budget_headroom: f64) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            current_limit: self.current_limit(),
            min_limit: self.min_limit,
            max_limit: self.max_limit,
            observed_p95_latency_ms: self.p95_latency().map(|p| p.as_millis() as u64),
            budget_headroom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(min: usize, initial: usize, max: usize) -> AdaptiveConcurrencyController {
        AdaptiveConcurrencyController::new(
            &ExecutionConfig::default().with_concurrency(min, initial, max),
        )
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let controller = controller(1, 2, 4);
        let cancel = Cancellation::new();

        let token_a = controller.acquire(&cancel).await.unwrap();
        let _token_b = controller.acquire(&cancel).await.unwrap();

        // Third acquire must wait until a token drops.
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            controller.acquire(&cancel),
        )
        .await;
        assert!(pending.is_err());

        drop(token_a);
        let _token_c = tokio::time::timeout(
            Duration::from_secs(1),
            controller.acquire(&cancel),
        )
        .await
        .expect("slot freed")
        .unwrap();
    }

    #[tokio::test]
    async fn acquire_fails_on_cancellation() {
        let controller = controller(1, 1, 1);
        let cancel = Cancellation::new();
        let _held = controller.acquire(&cancel).await.unwrap();

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.acquire(&cancel).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter returned")
            .unwrap();
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }

    #[test]
    fn latency_pressure_shrinks_limit() {
        let controller = controller(2, 100, 100);
        for _ in 0..50 {
            controller.record_latency(Duration::from_secs(60));
        }
        controller.reconcile(1.0);
        assert_eq!(controller.current_limit(), 90);
    }

    #[test]
    fn low_headroom_halves_limit() {
        let controller = controller(2, 40, 100);
        controller.reconcile(0.05);
        assert_eq!(controller.current_limit(), 20);
    }

    #[test]
    fn idle_limit_creeps_up_and_caps() {
        let controller = controller(2, 99, 100);
        controller.reconcile(1.0);
        assert_eq!(controller.current_limit(), 100);
        controller.reconcile(1.0);
        assert_eq!(controller.current_limit(), 100);
    }

    #[test]
    fn limit_never_leaves_bounds() {
        let controller = controller(5, 6, 50);
        for _ in 0..20 {
            controller.reconcile(0.0);
        }
        assert_eq!(controller.current_limit(), 5);
        for _ in 0..200 {
            controller.reconcile(1.0);
        }
        assert_eq!(controller.current_limit(), 50);
    }

    #[tokio::test]
    async fn waiters_survive_limit_swap() {
        let controller = Arc::new(controller(1, 1, 8));
        let cancel = Cancellation::new();
        let held = controller.acquire(&cancel).await.unwrap();

        let waiter = {
            let controller = controller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.acquire(&cancel).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Raising the limit swaps the semaphore; the parked waiter must
        // re-acquire against the new primitive without an external nudge.
        controller.reconcile(1.0);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .unwrap();
        assert!(result.is_ok());
        drop(held);
    }

    #[test]
    fn p95_of_window() {
        let controller = controller(1, 10, 20);
        assert!(controller.p95_latency().is_none());
        for i in 1..=100u64 {
            controller.record_latency(Duration::from_millis(i));
        }
        assert_eq!(controller.p95_latency(), Some(Duration::from_millis(95)));
    }
}
