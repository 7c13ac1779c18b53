//! Cost guardrails: per-plan spend tracking against soft and hard caps.

use std::sync::Arc;

use async_trait::async_trait;
use atomflow_core::{AtomId, BudgetState, BudgetStatus};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Gate decision for starting one atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Below the soft cap
    Proceed,
    /// Soft cap crossed; execution continues with a one-time alert
    Alert,
    /// Hard cap crossed; the atom must not start
    Block,
}

/// Notification channel for budget threshold crossings.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert message. Failures are the notifier's problem;
    /// budget accounting never depends on delivery.
    async fn notify(&self, message: &str);
}

/// Notifier that writes alerts to the log.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, message: &str) {
        warn!(alert = message, "budget notification");
    }
}

/// Notifier that posts alerts to a webhook URL as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a webhook notifier for a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let payload = serde_json::json!({ "text": message });
        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            warn!(error = %e, "budget webhook delivery failed");
        }
    }
}

/// Tracks cumulative spend for one plan and gates new atom starts.
///
/// `record_cost` is the single mutation point for the accumulated cost;
/// the internal mutex serializes updates from concurrent atom tasks.
pub struct CostGuardrails {
    state: Mutex<BudgetState>,
    notifier: Arc<dyn Notifier>,
}

impl CostGuardrails {
    /// Create guardrails over an initial budget state, alerting to the log.
    pub fn new(state: BudgetState) -> Self {
        Self {
            state: Mutex::new(state),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Replace the notification channel.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the tracked state, e.g. with one loaded from storage.
    pub async fn restore(&self, state: BudgetState) {
        *self.state.lock().await = state;
    }

    /// Gate check before starting an atom.
    pub async fn check_before(&self, atom_id: AtomId) -> BudgetDecision {
        let status = self.state.lock().await.status;
        match status {
            BudgetStatus::Ok => BudgetDecision::Proceed,
            BudgetStatus::SoftExceeded => BudgetDecision::Alert,
            BudgetStatus::HardPaused => {
                info!(atom = %atom_id, "atom start blocked by hard budget cap");
                BudgetDecision::Block
            }
        }
    }

    /// Record cost incurred by an atom. Fires a one-time notification per
    /// threshold crossing. Returns the budget status after the update.
    pub async fn record_cost(&self, atom_id: AtomId, amount: f64) -> BudgetStatus {
        let (before, after, snapshot) = {
            let mut state = self.state.lock().await;
            let before = state.status;
            let after = state.add_cost(amount);
            (before, after, state.clone())
        };

        if before != after {
            let message = match after {
                BudgetStatus::SoftExceeded => format!(
                    "plan {} crossed its soft cap: {:.2} of {:.2} spent",
                    snapshot.plan_id, snapshot.accumulated_cost, snapshot.soft_cap
                ),
                BudgetStatus::HardPaused => format!(
                    "plan {} crossed its hard cap and is paused: {:.2} of {:.2} spent",
                    snapshot.plan_id, snapshot.accumulated_cost, snapshot.hard_cap
                ),
                BudgetStatus::Ok => String::new(),
            };
            if !message.is_empty() {
                warn!(atom = %atom_id, status = %after, "budget threshold crossed");
                self.notifier.notify(&message).await;
            }
        }

        after
    }

    /// Operator override: raise the hard cap and leave the paused state.
    pub async fn raise_hard_cap(&self, new_cap: f64) -> BudgetState {
        let mut state = self.state.lock().await;
        state.raise_hard_cap(new_cap);
        info!(hard_cap = new_cap, status = %state.status, "hard cap raised");
        state.clone()
    }

    /// Fraction of the hard cap still unspent.
    pub async fn headroom(&self) -> f64 {
        self.state.lock().await.headroom()
    }

    /// Snapshot of the tracked state for reporting and persistence.
    pub async fn state(&self) -> BudgetState {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_core::PlanId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn decisions_follow_thresholds() {
        let plan = PlanId::new();
        let atom = AtomId::new();
        let guardrails = CostGuardrails::new(BudgetState::new(plan, 10.0, 20.0));

        assert_eq!(guardrails.check_before(atom).await, BudgetDecision::Proceed);
        guardrails.record_cost(atom, 12.0).await;
        assert_eq!(guardrails.check_before(atom).await, BudgetDecision::Alert);
        guardrails.record_cost(atom, 10.0).await;
        assert_eq!(guardrails.check_before(atom).await, BudgetDecision::Block);
    }

    #[tokio::test]
    async fn one_notification_per_crossing() {
        let plan = PlanId::new();
        let atom = AtomId::new();
        let notifier = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let guardrails = CostGuardrails::new(BudgetState::new(plan, 10.0, 20.0))
            .with_notifier(notifier.clone());

        guardrails.record_cost(atom, 4.0).await;
        guardrails.record_cost(atom, 4.0).await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 0);

        // Soft crossing fires once, further soft-range spend stays quiet.
        guardrails.record_cost(atom, 4.0).await;
        guardrails.record_cost(atom, 4.0).await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);

        // Hard crossing fires once more.
        guardrails.record_cost(atom, 10.0).await;
        guardrails.record_cost(atom, 1.0).await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn raise_hard_cap_unblocks() {
        let plan = PlanId::new();
        let atom = AtomId::new();
        let guardrails = CostGuardrails::new(BudgetState::new(plan, 5.0, 10.0));

        guardrails.record_cost(atom, 10.0).await;
        assert_eq!(guardrails.check_before(atom).await, BudgetDecision::Block);

        guardrails.raise_hard_cap(100.0).await;
        assert_eq!(guardrails.check_before(atom).await, BudgetDecision::Alert);
    }

    #[tokio::test]
    async fn concurrent_record_cost_is_lossless() {
        let plan = PlanId::new();
        let guardrails = Arc::new(CostGuardrails::new(BudgetState::new(plan, 1e9, 1e9)));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let guardrails = guardrails.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    guardrails.record_cost(AtomId::new(), 1.0).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(guardrails.state().await.accumulated_cost, 1000.0);
    }
}
