//! Error type for the execution core.

use atomflow_core::AtomId;

/// Errors surfaced by the executor and coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The plan was cooperatively cancelled
    #[error("execution cancelled")]
    Cancelled,

    /// Storage failure
    #[error("store error: {0}")]
    Store(#[from] atomflow_storage::StoreError),

    /// Graph construction or scheduling failure
    #[error("graph error: {0}")]
    Graph(#[from] atomflow_graph::GraphError),

    /// A referenced atom does not exist
    #[error("atom not found: {0}")]
    AtomNotFound(AtomId),

    /// The atom is not in a state the requested operation accepts
    #[error("atom {id} is {status}, expected {expected}")]
    InvalidAtomState {
        /// The atom
        id: AtomId,
        /// Its current status
        status: String,
        /// What the operation needed
        expected: String,
    },
}
