//! Plan-level status and wave records.

use serde::{Deserialize, Serialize};

use crate::id::AtomId;

/// Terminal and transient states of one execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    /// Not started
    Pending,
    /// A coordinating task is driving waves
    Running,
    /// Every atom completed
    Completed,
    /// The plan finished but some atoms failed permanently
    CompletedWithFailures,
    /// Unreachable atoms remain due to upstream failures
    Blocked,
    /// Hard budget cap reached; waiting for an operator override
    PausedBudget,
    /// Cooperatively cancelled
    Cancelled,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::CompletedWithFailures => "completed-with-failures",
            PlanStatus::Blocked => "blocked",
            PlanStatus::PausedBudget => "paused-budget",
            PlanStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Status of one execution wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveStatus {
    /// Not yet started
    Pending,
    /// Atoms in flight
    Running,
    /// Every atom completed
    Completed,
    /// Every atom failed or was blocked
    Failed,
    /// Some atoms completed, some reached a failure state
    Partial,
}

/// An ordered group of atoms whose dependencies are all satisfied by
/// earlier waves. Atoms within a wave are mutually independent and may run
/// concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionWave {
    /// Zero-based position in the plan
    pub number: usize,

    /// Member atoms
    pub atom_ids: Vec<AtomId>,

    /// Current status
    pub status: WaveStatus,
}

impl ExecutionWave {
    /// Create a pending wave.
    pub fn new(number: usize, atom_ids: Vec<AtomId>) -> Self {
        Self {
            number,
            atom_ids,
            status: WaveStatus::Pending,
        }
    }

    /// Number of atoms in this wave.
    pub fn len(&self) -> usize {
        self.atom_ids.len()
    }

    /// True when the wave has no atoms.
    pub fn is_empty(&self) -> bool {
        self.atom_ids.is_empty()
    }
}

/// Transient view of the concurrency controller, recomputed on demand and
/// only ever logged or reported, never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConcurrencySnapshot {
    /// Current ceiling on in-flight atoms
    pub current_limit: usize,

    /// Floor the controller will not go below
    pub min_limit: usize,

    /// Ceiling the controller will not exceed
    pub max_limit: usize,

    /// Observed p95 latency of collaborator calls, if any samples exist
    pub observed_p95_latency_ms: Option<u64>,

    /// Budget headroom fraction at snapshot time
    pub budget_headroom: f64,
}
