//! Boundary to the external generation + validation collaborator.
//!
//! The execution core treats code generation and multi-level validation as
//! one opaque async call that returns an outcome, a validation verdict,
//! and the cost incurred. Nothing in this crate interprets validation
//! internals beyond the error text handed to the retry orchestrator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use atomflow_core::{Atom, AtomId};
use tokio::sync::Mutex;

/// Parameters for one generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Sampling temperature for the generator
    pub temperature: f64,
    /// 0 for the initial attempt, then the retry attempt number
    pub attempt: u32,
    /// Feedback from the previous failed attempt, if any
    pub feedback: Option<String>,
}

impl GenerationRequest {
    /// Request for the initial attempt at the given temperature.
    pub fn initial(temperature: f64) -> Self {
        Self {
            temperature,
            attempt: 0,
            feedback: None,
        }
    }
}

/// Validation verdict attached to an execution outcome.
#[derive(Debug, Clone)]
pub struct ValidationVerdict {
    /// Whether all validation levels passed
    pub passed: bool,
    /// Structured error detail for failed validation
    pub errors: Vec<String>,
}

impl ValidationVerdict {
    /// A passing verdict.
    pub fn pass() -> Self {
        Self {
            passed: true,
            errors: Vec::new(),
        }
    }

    /// A failing verdict with error detail.
    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            passed: false,
            errors,
        }
    }
}

/// Result of one collaborator call.
#[derive(Debug, Clone)]
pub struct AtomOutcome {
    /// Validation verdict for the generated code
    pub verdict: ValidationVerdict,
    /// Cost incurred by the attempt, successful or not
    pub cost: f64,
}

/// External execution collaborator: wraps code generation plus validation
/// behind one async call.
#[async_trait]
pub trait AtomExecutor: Send + Sync {
    /// Generate and validate code for one atom.
    ///
    /// `Err` means the collaborator itself failed (network, provider);
    /// `Ok` with a failing verdict means generation ran but validation
    /// rejected the output. Both count as atom failures.
    async fn execute(&self, atom: &Atom, request: &GenerationRequest)
        -> anyhow::Result<AtomOutcome>;
}

/// Deterministic collaborator for tests and simulated runs.
///
/// Failures can be scripted per atom; each scripted failure is consumed by
/// one attempt, after which the atom succeeds. The executor also counts
/// in-flight calls so tests can assert the concurrency bound.
pub struct SimulatedAtomExecutor {
    delay: Duration,
    cost_per_attempt: f64,
    scripted_failures: Mutex<HashMap<AtomId, VecDeque<String>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SimulatedAtomExecutor {
    /// Create a simulator with no scripted failures.
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(5),
            cost_per_attempt: 1.0,
            scripted_failures: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Set the simulated call latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the cost charged per attempt.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_attempt = cost;
        self
    }

    /// Script the next failures for an atom; one message per failing
    /// attempt, consumed in order.
    pub async fn fail_with(&self, atom_id: AtomId, errors: impl IntoIterator<Item = String>) {
        self.scripted_failures
            .lock()
            .await
            .entry(atom_id)
            .or_default()
            .extend(errors);
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedAtomExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomExecutor for SimulatedAtomExecutor {
    async fn execute(
        &self,
        atom: &Atom,
        _request: &GenerationRequest,
    ) -> anyhow::Result<AtomOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        let scripted = self
            .scripted_failures
            .lock()
            .await
            .get_mut(&atom.id)
            .and_then(|queue| queue.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match scripted {
            Some(error) => Ok(AtomOutcome {
                verdict: ValidationVerdict::fail(vec![error]),
                cost: self.cost_per_attempt,
            }),
            None => Ok(AtomOutcome {
                verdict: ValidationVerdict::pass(),
                cost: self.cost_per_attempt,
            }),
        }
    }
}
