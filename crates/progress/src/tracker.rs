//! Per-status atom counts for a plan.

use std::sync::Arc;

use atomflow_core::{Atom, AtomStatus, PlanId};
use atomflow_storage::{PlanStore, Result};
use serde::{Deserialize, Serialize};

/// Roll-up of atom statuses for one plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Atoms waiting for their wave
    pub pending: usize,
    /// Atoms eligible to start
    pub ready: usize,
    /// Atoms currently executing
    pub running: usize,
    /// Atoms between retry attempts
    pub retrying: usize,
    /// Atoms completed successfully
    pub completed: usize,
    /// Atoms with retries exhausted
    pub failed: usize,
    /// Atoms blocked by a failed dependency
    pub blocked: usize,
    /// Atoms skipped because the plan stopped early
    pub skipped: usize,
}

impl StatusCounts {
    /// Count statuses over a set of atoms.
    pub fn from_atoms<'a>(atoms: impl IntoIterator<Item = &'a Atom>) -> Self {
        let mut counts = Self::default();
        for atom in atoms {
            counts.add(atom.status);
        }
        counts
    }

    /// Add one atom's status to the counts.
    pub fn add(&mut self, status: AtomStatus) {
        match status {
            AtomStatus::Pending => self.pending += 1,
            AtomStatus::Ready => self.ready += 1,
            AtomStatus::Running => self.running += 1,
            AtomStatus::Retrying => self.retrying += 1,
            AtomStatus::Completed => self.completed += 1,
            AtomStatus::Failed => self.failed += 1,
            AtomStatus::Blocked => self.blocked += 1,
            AtomStatus::Skipped => self.skipped += 1,
        }
    }

    /// Total atoms counted.
    pub fn total(&self) -> usize {
        self.pending
            + self.ready
            + self.running
            + self.retrying
            + self.completed
            + self.failed
            + self.blocked
            + self.skipped
    }

    /// Atoms in a terminal state.
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.blocked + self.skipped
    }

    /// Fraction of atoms in a terminal state, in [0, 1].
    pub fn completion_fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        self.terminal() as f64 / total as f64
    }
}

/// Reads plan progress from the store.
pub struct PlanTracker {
    store: Arc<dyn PlanStore>,
}

impl PlanTracker {
    /// Create a tracker over a store.
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self { store }
    }

    /// Current status counts for a plan.
    pub async fn counts(&self, plan_id: PlanId) -> Result<StatusCounts> {
        let atoms = self.store.load_atoms(plan_id).await?;
        Ok(StatusCounts::from_atoms(atoms.iter()))
    }
}
