//! Execution core: adaptive concurrency, budget guardrails, retry
//! orchestration, and wave-by-wave plan execution.

#![warn(missing_docs)]

mod budget;
mod cancel;
mod collaborator;
mod concurrency;
mod coordinator;
mod error;
mod executor;
mod retry;

pub use budget::{BudgetDecision, CostGuardrails, Notifier, TracingNotifier, WebhookNotifier};
pub use cancel::Cancellation;
pub use collaborator::{
    AtomExecutor, AtomOutcome, GenerationRequest, SimulatedAtomExecutor, ValidationVerdict,
};
pub use concurrency::{AdaptiveConcurrencyController, ConcurrencyToken};
pub use coordinator::{ExecutionCoordinator, PlanProgress, PlanResult, PlanStatusReport};
pub use error::ExecutionError;
pub use executor::{WaveExecutor, WaveResult};
pub use retry::{CategoryStats, RetryDecision, RetryOrchestrator, RetryStats};
