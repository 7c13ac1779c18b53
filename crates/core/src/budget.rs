//! Per-plan budget state.

use serde::{Deserialize, Serialize};

use crate::id::PlanId;

/// Budget status for one execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetStatus {
    /// Below the soft cap
    Ok,
    /// At or above the soft cap, below the hard cap
    SoftExceeded,
    /// At or above the hard cap; no new atoms may start
    HardPaused,
}

impl std::fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BudgetStatus::Ok => "ok",
            BudgetStatus::SoftExceeded => "soft_exceeded",
            BudgetStatus::HardPaused => "hard_paused",
        };
        write!(f, "{}", s)
    }
}

/// Accumulated spend against soft/hard caps for one plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetState {
    /// Owning plan
    pub plan_id: PlanId,

    /// Alert threshold
    pub soft_cap: f64,

    /// Hard stop threshold
    pub hard_cap: f64,

    /// Total cost recorded so far
    pub accumulated_cost: f64,

    /// Current status, derived from the caps on every mutation
    pub status: BudgetStatus,
}

impl BudgetState {
    /// Create a fresh budget for a plan.
    pub fn new(plan_id: PlanId, soft_cap: f64, hard_cap: f64) -> Self {
        Self {
            plan_id,
            soft_cap,
            hard_cap,
            accumulated_cost: 0.0,
            status: BudgetStatus::Ok,
        }
    }

    /// Add cost and rederive the status. Returns the new status.
    pub fn add_cost(&mut self, amount: f64) -> BudgetStatus {
        self.accumulated_cost += amount;
        self.status = self.derive_status();
        self.status
    }

    /// Raise the hard cap (operator override for a hard pause).
    pub fn raise_hard_cap(&mut self, new_cap: f64) {
        self.hard_cap = self.hard_cap.max(new_cap);
        self.status = self.derive_status();
    }

    /// Fraction of the hard cap still unspent, in [0, 1].
    pub fn headroom(&self) -> f64 {
        if self.hard_cap <= 0.0 {
            return 0.0;
        }
        ((self.hard_cap - self.accumulated_cost) / self.hard_cap).clamp(0.0, 1.0)
    }

    fn derive_status(&self) -> BudgetStatus {
        if self.accumulated_cost >= self.hard_cap {
            BudgetStatus::HardPaused
        } else if self.accumulated_cost >= self.soft_cap {
            BudgetStatus::SoftExceeded
        } else {
            BudgetStatus::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_caps() {
        let mut budget = BudgetState::new(PlanId::new(), 10.0, 20.0);
        assert_eq!(budget.add_cost(5.0), BudgetStatus::Ok);
        assert_eq!(budget.add_cost(5.0), BudgetStatus::SoftExceeded);
        assert_eq!(budget.add_cost(10.0), BudgetStatus::HardPaused);
    }

    #[test]
    fn raising_hard_cap_clears_pause() {
        let mut budget = BudgetState::new(PlanId::new(), 10.0, 20.0);
        budget.add_cost(25.0);
        assert_eq!(budget.status, BudgetStatus::HardPaused);
        budget.raise_hard_cap(50.0);
        assert_eq!(budget.status, BudgetStatus::SoftExceeded);
    }

    #[test]
    fn headroom_fraction() {
        let mut budget = BudgetState::new(PlanId::new(), 50.0, 100.0);
        assert_eq!(budget.headroom(), 1.0);
        budget.add_cost(75.0);
        assert!((budget.headroom() - 0.25).abs() < 1e-9);
        budget.add_cost(100.0);
        assert_eq!(budget.headroom(), 0.0);
    }
}
