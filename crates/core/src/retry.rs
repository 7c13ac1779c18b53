//! Retry history records and failure categories.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::id::{AtomId, AttemptId};
use crate::Time;

/// Category of an atom execution failure, derived from the external
/// validator's error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The generated code does not parse
    Syntax,
    /// Type checking failed
    Type,
    /// Semantic/behavioral validation failed
    Logic,
    /// The execution collaborator did not answer within the atom timeout
    Timeout,
    /// A symbol the atom needs was not available
    Dependency,
    /// The generation context was malformed or overflowed
    Context,
    /// Could not be classified; still eligible for a generic retry
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Type => "type",
            ErrorCategory::Logic => "logic",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Context => "context",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// The failure was retried
    Retried,
    /// The retry succeeded
    Succeeded,
    /// The orchestrator gave up on the atom
    GaveUp,
}

/// One entry in an atom's append-only retry history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Unique identifier
    pub id: AttemptId,

    /// The atom that failed
    pub atom_id: AtomId,

    /// 1-based attempt number
    pub attempt_number: u32,

    /// Classified failure category
    pub error_category: ErrorCategory,

    /// Generation temperature used for the retry (None on give-up)
    pub temperature_used: Option<f64>,

    /// Backoff applied before the retry was released
    pub backoff_delay: Duration,

    /// When the decision was made
    pub timestamp: Time,

    /// What happened
    pub outcome: AttemptOutcome,
}

impl RetryAttempt {
    /// Record a retry decision.
    pub fn retried(
        atom_id: AtomId,
        attempt_number: u32,
        category: ErrorCategory,
        temperature: f64,
        backoff: Duration,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            atom_id,
            attempt_number,
            error_category: category,
            temperature_used: Some(temperature),
            backoff_delay: backoff,
            timestamp: chrono::Utc::now(),
            outcome: AttemptOutcome::Retried,
        }
    }

    /// Record a give-up decision.
    pub fn gave_up(atom_id: AtomId, attempt_number: u32, category: ErrorCategory) -> Self {
        Self {
            id: AttemptId::new(),
            atom_id,
            attempt_number,
            error_category: category,
            temperature_used: None,
            backoff_delay: Duration::ZERO,
            timestamp: chrono::Utc::now(),
            outcome: AttemptOutcome::GaveUp,
        }
    }

    /// Mark this attempt's retry as having succeeded.
    pub fn succeeded(mut self) -> Self {
        self.outcome = AttemptOutcome::Succeeded;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retried_record_carries_temperature() {
        let attempt = RetryAttempt::retried(
            AtomId::new(),
            1,
            ErrorCategory::Syntax,
            0.7,
            Duration::from_secs(1),
        );
        assert_eq!(attempt.outcome, AttemptOutcome::Retried);
        assert_eq!(attempt.temperature_used, Some(0.7));
        assert_eq!(attempt.attempt_number, 1);
    }

    #[test]
    fn give_up_record_has_no_temperature() {
        let attempt = RetryAttempt::gave_up(AtomId::new(), 4, ErrorCategory::Logic);
        assert_eq!(attempt.outcome, AttemptOutcome::GaveUp);
        assert!(attempt.temperature_used.is_none());
        assert_eq!(attempt.backoff_delay, Duration::ZERO);
    }
}
