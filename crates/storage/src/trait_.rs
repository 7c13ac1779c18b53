//! Repository trait abstraction.

use async_trait::async_trait;
use atomflow_core::{Atom, AtomId, BudgetState, Event, PlanId, RetryAttempt};

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Narrow repository interface for execution state.
///
/// The core persists atom status, retry history, budget state, and audit
/// events through this trait; schema and backend details stay outside the
/// execution core. Implementations must tolerate concurrent calls from
/// many in-flight atom tasks.
#[async_trait]
pub trait PlanStore: Send + Sync {
    // === Atom operations ===

    /// Load every atom of a plan.
    async fn load_atoms(&self, plan_id: PlanId) -> Result<Vec<Atom>>;

    /// Load a single atom.
    async fn load_atom(&self, id: AtomId) -> Result<Option<Atom>>;

    /// Save an atom (create or update status/cost/retry fields).
    async fn save_atom(&self, atom: &Atom) -> Result<()>;

    // === Retry history ===

    /// Append one attempt record to an atom's history.
    async fn append_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()>;

    /// List an atom's attempt history in append order.
    async fn list_retry_attempts(&self, atom_id: AtomId) -> Result<Vec<RetryAttempt>>;

    // === Budget ===

    /// Load the budget state of a plan.
    async fn load_budget(&self, plan_id: PlanId) -> Result<Option<BudgetState>>;

    /// Save the budget state of a plan.
    async fn save_budget(&self, state: &BudgetState) -> Result<()>;

    // === Audit events ===

    /// Append an audit event.
    async fn save_event(&self, event: &Event) -> Result<()>;

    /// List a plan's audit events in append order.
    async fn list_events(&self, plan_id: PlanId) -> Result<Vec<Event>>;
}
