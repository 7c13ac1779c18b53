//! Wave execution: bounded-concurrent atom execution with retry loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use atomflow_core::{Atom, AtomId, AtomStatus, ErrorCategory, ExecutionConfig, ExecutionWave, WaveStatus};
use atomflow_progress::EtaEstimator;
use atomflow_storage::PlanStore;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::budget::{BudgetDecision, CostGuardrails};
use crate::cancel::Cancellation;
use crate::collaborator::{AtomExecutor, GenerationRequest};
use crate::concurrency::AdaptiveConcurrencyController;
use crate::error::ExecutionError;
use crate::retry::{RetryDecision, RetryOrchestrator};

/// Terminal outcome of one atom task within a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomTerminal {
    Completed,
    Failed,
    Blocked,
    /// Cancelled mid-flight; the atom reverted to pending.
    Interrupted,
}

/// Outcome of one executed wave. The executor only returns once every
/// member atom reached a terminal state.
#[derive(Debug, Clone)]
pub struct WaveResult {
    /// The wave that ran
    pub wave_number: usize,
    /// Atoms that completed
    pub completed: Vec<AtomId>,
    /// Atoms that exhausted their retries
    pub failed: Vec<AtomId>,
    /// Atoms blocked by the budget gate or a failed dependency
    pub blocked: Vec<AtomId>,
    /// Atoms skipped because an upstream atom was already blocked
    pub skipped: Vec<AtomId>,
}

impl WaveResult {
    pub(crate) fn new(wave_number: usize) -> Self {
        Self {
            wave_number,
            completed: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Wave status implied by the member outcomes.
    pub fn status(&self) -> WaveStatus {
        let reached_failure = self.failed.len() + self.blocked.len() + self.skipped.len();
        if reached_failure == 0 {
            WaveStatus::Completed
        } else if self.completed.is_empty() {
            WaveStatus::Failed
        } else {
            WaveStatus::Partial
        }
    }
}

enum CallOutcome {
    Success(f64),
    Failure(String, f64),
}

/// Drives the atoms of one wave to their terminal states.
///
/// Each atom runs as an independent task: acquire a concurrency token,
/// pass the budget gate, call the collaborator under the atom timeout,
/// and on failure loop through the retry orchestrator with the token
/// released during backoff. Completion is signaled over a channel; the
/// wave returns when every member has reported.
#[derive(Clone)]
pub struct WaveExecutor {
    config: ExecutionConfig,
    store: Arc<dyn PlanStore>,
    collaborator: Arc<dyn AtomExecutor>,
    controller: Arc<AdaptiveConcurrencyController>,
    guardrails: Arc<CostGuardrails>,
    retry: Arc<RetryOrchestrator>,
    atoms: Arc<Mutex<HashMap<AtomId, Atom>>>,
    estimator: Arc<Mutex<EtaEstimator>>,
    cancel: Cancellation,
}

impl WaveExecutor {
    /// Wire up an executor over the shared run state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutionConfig,
        store: Arc<dyn PlanStore>,
        collaborator: Arc<dyn AtomExecutor>,
        controller: Arc<AdaptiveConcurrencyController>,
        guardrails: Arc<CostGuardrails>,
        retry: Arc<RetryOrchestrator>,
        atoms: Arc<Mutex<HashMap<AtomId, Atom>>>,
        estimator: Arc<Mutex<EtaEstimator>>,
        cancel: Cancellation,
    ) -> Self {
        Self {
            config,
            store,
            collaborator,
            controller,
            guardrails,
            retry,
            atoms,
            estimator,
            cancel,
        }
    }

    /// Execute one wave to completion.
    ///
    /// Returns `Err(Cancelled)` when the plan was cancelled; by then every
    /// in-flight atom has released its token and reverted to pending.
    pub async fn execute_wave(&self, wave: &ExecutionWave) -> Result<WaveResult, ExecutionError> {
        info!(wave = wave.number, atoms = wave.len(), "wave started");

        let (tx, mut rx) = mpsc::channel(wave.len().max(1));
        for id in wave.atom_ids.iter().copied() {
            let executor = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let terminal = executor.run_atom(id).await;
                let _ = tx.send((id, terminal)).await;
            });
        }
        drop(tx);

        let mut result = WaveResult::new(wave.number);
        while let Some((id, terminal)) = rx.recv().await {
            match terminal {
                AtomTerminal::Completed => result.completed.push(id),
                AtomTerminal::Failed => result.failed.push(id),
                AtomTerminal::Blocked => result.blocked.push(id),
                AtomTerminal::Interrupted => {}
            }
        }

        if self.cancel.is_cancelled() {
            info!(wave = wave.number, "wave interrupted by cancellation");
            return Err(ExecutionError::Cancelled);
        }

        info!(
            wave = wave.number,
            completed = result.completed.len(),
            failed = result.failed.len(),
            blocked = result.blocked.len(),
            "wave finished"
        );
        Ok(result)
    }

    /// Drive one atom to a terminal state.
    async fn run_atom(&self, id: AtomId) -> AtomTerminal {
        let initial_temperature = self
            .config
            .temperature_schedule
            .first()
            .copied()
            .unwrap_or(0.7);
        let mut request = GenerationRequest::initial(initial_temperature);

        loop {
            if self.cancel.is_cancelled() {
                self.update_atom(id, |a| a.set_status(AtomStatus::Pending)).await;
                return AtomTerminal::Interrupted;
            }

            let token = match self.controller.acquire(&self.cancel).await {
                Ok(token) => token,
                Err(_) => {
                    self.update_atom(id, |a| a.set_status(AtomStatus::Pending)).await;
                    return AtomTerminal::Interrupted;
                }
            };

            if self.guardrails.check_before(id).await == BudgetDecision::Block {
                drop(token);
                self.update_atom(id, |a| a.set_status(AtomStatus::Blocked)).await;
                return AtomTerminal::Blocked;
            }

            let Some(atom) = self
                .update_atom(id, |a| a.set_status(AtomStatus::Running))
                .await
            else {
                warn!(atom = %id, "atom vanished from the run set");
                return AtomTerminal::Failed;
            };

            let started = Instant::now();
            let call = tokio::time::timeout(
                self.config.atom_timeout,
                self.collaborator.execute(&atom, &request),
            );
            let call_result = tokio::select! {
                result = call => result,
                _ = self.cancel.cancelled() => {
                    drop(token);
                    self.update_atom(id, |a| a.set_status(AtomStatus::Pending)).await;
                    return AtomTerminal::Interrupted;
                }
            };
            let elapsed = started.elapsed();
            self.controller.record_latency(elapsed);

            let outcome = match call_result {
                Ok(Ok(outcome)) if outcome.verdict.passed => CallOutcome::Success(outcome.cost),
                Ok(Ok(outcome)) => {
                    CallOutcome::Failure(outcome.verdict.errors.join("; "), outcome.cost)
                }
                Ok(Err(e)) => CallOutcome::Failure(e.to_string(), 0.0),
                Err(_) => CallOutcome::Failure(
                    format!(
                        "atom execution timed out after {}s",
                        self.config.atom_timeout.as_secs()
                    ),
                    0.0,
                ),
            };

            match outcome {
                CallOutcome::Success(cost) => {
                    self.guardrails.record_cost(id, cost).await;
                    let atom = self
                        .update_atom(id, |a| {
                            a.accumulated_cost += cost;
                            a.set_status(AtomStatus::Completed);
                        })
                        .await;
                    if let Some(atom) = atom {
                        if atom.retry_count > 0 {
                            if let Err(e) = self.retry.record_success(&atom).await {
                                warn!(atom = %id, error = %e, "failed to record retry success");
                            }
                        }
                    }
                    self.estimator.lock().await.record(elapsed);
                    drop(token);
                    debug!(atom = %id, elapsed_ms = elapsed.as_millis() as u64, "atom completed");
                    return AtomTerminal::Completed;
                }
                CallOutcome::Failure(error, cost) => {
                    if cost > 0.0 {
                        self.guardrails.record_cost(id, cost).await;
                        self.update_atom(id, |a| a.accumulated_cost += cost).await;
                    }

                    let decision = match self.retry.handle_failure(&atom, &error).await {
                        Ok(decision) => decision,
                        Err(e) => {
                            warn!(atom = %id, error = %e, "retry history write failed; giving up");
                            RetryDecision::GiveUp {
                                category: ErrorCategory::Unknown,
                            }
                        }
                    };

                    match decision {
                        RetryDecision::Retry {
                            attempt,
                            category,
                            temperature,
                            delay,
                            feedback,
                        } => {
                            self.update_atom(id, |a| {
                                a.retry_count = attempt;
                                a.last_error = Some(category);
                                a.set_status(AtomStatus::Retrying);
                            })
                            .await;
                            drop(token);

                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = self.cancel.cancelled() => {
                                    self.update_atom(id, |a| a.set_status(AtomStatus::Pending)).await;
                                    return AtomTerminal::Interrupted;
                                }
                            }

                            request = GenerationRequest {
                                temperature,
                                attempt,
                                feedback: Some(feedback),
                            };
                        }
                        RetryDecision::GiveUp { category } => {
                            self.update_atom(id, |a| {
                                a.last_error = Some(category);
                                a.set_status(AtomStatus::Failed);
                            })
                            .await;
                            drop(token);
                            info!(atom = %id, category = %category, "atom failed permanently");
                            return AtomTerminal::Failed;
                        }
                    }
                }
            }
        }
    }

    /// Mutate an atom under the run-set lock and persist the snapshot.
    /// Each atom is owned by exactly one task at a time; the lock only
    /// guards the map itself.
    async fn update_atom<F>(&self, id: AtomId, mutate: F) -> Option<Atom>
    where
        F: FnOnce(&mut Atom),
    {
        let snapshot = {
            let mut atoms = self.atoms.lock().await;
            let atom = atoms.get_mut(&id)?;
            mutate(atom);
            atom.clone()
        };
        if let Err(e) = self.store.save_atom(&snapshot).await {
            warn!(atom = %id, error = %e, "atom save failed");
        }
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::SimulatedAtomExecutor;
    use atomflow_core::{BudgetState, PlanId};
    use atomflow_storage::MemoryStore;
    use std::time::Duration;

    struct Harness {
        executor: WaveExecutor,
        store: Arc<MemoryStore>,
        collaborator: Arc<SimulatedAtomExecutor>,
        atoms: Arc<Mutex<HashMap<AtomId, Atom>>>,
        cancel: Cancellation,
        plan: PlanId,
    }

    async fn harness(config: ExecutionConfig, atom_count: usize) -> (Harness, ExecutionWave) {
        harness_with(config, atom_count, SimulatedAtomExecutor::new()).await
    }

    async fn harness_with(
        config: ExecutionConfig,
        atom_count: usize,
        collaborator: SimulatedAtomExecutor,
    ) -> (Harness, ExecutionWave) {
        let plan = PlanId::new();
        let store = Arc::new(MemoryStore::new());
        let collaborator = Arc::new(collaborator);
        let cancel = Cancellation::new();

        let mut map = HashMap::new();
        let mut ids = Vec::new();
        for i in 0..atom_count {
            let atom = Atom::new(plan, format!("atom{i}"), "").with_estimated_cost(1.0);
            store.save_atom(&atom).await.unwrap();
            ids.push(atom.id);
            map.insert(atom.id, atom);
        }

        let guardrails = Arc::new(CostGuardrails::new(BudgetState::new(
            plan,
            config.soft_cap,
            config.hard_cap,
        )));
        let executor = WaveExecutor::new(
            config.clone(),
            store.clone(),
            collaborator.clone(),
            Arc::new(AdaptiveConcurrencyController::new(&config)),
            guardrails,
            Arc::new(RetryOrchestrator::new(config, store.clone())),
            Arc::new(Mutex::new(map)),
            Arc::new(Mutex::new(EtaEstimator::default())),
            cancel.clone(),
        );
        let atoms = executor.atoms.clone();

        (
            Harness {
                executor,
                store,
                collaborator,
                atoms,
                cancel,
                plan,
            },
            ExecutionWave::new(0, ids),
        )
    }

    #[tokio::test]
    async fn wave_completes_all_atoms() {
        let config = ExecutionConfig::default().with_caps(1e6, 1e6);
        let (h, wave) = harness(config, 8).await;

        let result = h.executor.execute_wave(&wave).await.unwrap();
        assert_eq!(result.completed.len(), 8);
        assert!(result.failed.is_empty());
        assert_eq!(result.status(), WaveStatus::Completed);

        for atom in h.store.load_atoms(h.plan).await.unwrap() {
            assert_eq!(atom.status, AtomStatus::Completed);
            assert_eq!(atom.accumulated_cost, 1.0);
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_limit() {
        let config = ExecutionConfig::default()
            .with_concurrency(2, 20, 20)
            .with_caps(1e6, 1e6);
        let collaborator = SimulatedAtomExecutor::new().with_delay(Duration::from_millis(5));
        let (h, wave) = harness_with(config, 150, collaborator).await;

        let result = h.executor.execute_wave(&wave).await.unwrap();
        assert_eq!(result.completed.len(), 150);
        assert!(h.collaborator.peak_in_flight() <= 20);
        // A limit of 20 over 150 atoms should actually be exercised.
        assert!(h.collaborator.peak_in_flight() > 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_completes() {
        let config = ExecutionConfig::default()
            .with_caps(1e6, 1e6)
            .with_backoff_base(Duration::from_millis(1));
        let (h, wave) = harness(config, 3).await;

        let victim = wave.atom_ids[1];
        h.collaborator
            .fail_with(victim, ["syntax error at line 2".to_string()])
            .await;

        let result = h.executor.execute_wave(&wave).await.unwrap();
        assert_eq!(result.completed.len(), 3);

        let atom = h.store.load_atom(victim).await.unwrap().unwrap();
        assert_eq!(atom.status, AtomStatus::Completed);
        assert_eq!(atom.retry_count, 1);
        assert_eq!(atom.last_error, Some(ErrorCategory::Syntax));
        // Two units of cost: failed attempt plus the retry.
        assert_eq!(atom.accumulated_cost, 2.0);

        let history = h.store.list_retry_attempts(victim).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].temperature_used, Some(0.7));
    }

    #[tokio::test]
    async fn retries_exhaust_to_failed_final() {
        let config = ExecutionConfig::default()
            .with_caps(1e6, 1e6)
            .with_backoff_base(Duration::from_millis(1));
        let (h, wave) = harness(config, 2).await;

        let victim = wave.atom_ids[0];
        h.collaborator
            .fail_with(
                victim,
                (0..4).map(|i| format!("assertion failed: case {i}")),
            )
            .await;

        let result = h.executor.execute_wave(&wave).await.unwrap();
        assert_eq!(result.completed.len(), 1);
        assert_eq!(result.failed, vec![victim]);
        assert_eq!(result.status(), WaveStatus::Partial);

        let atom = h.store.load_atom(victim).await.unwrap().unwrap();
        assert_eq!(atom.status, AtomStatus::Failed);
        assert_eq!(atom.retry_count, 3);
        assert_eq!(atom.last_error, Some(ErrorCategory::Logic));

        // Three retries plus the final give-up are all on record, with a
        // non-increasing temperature sequence.
        let history = h.store.list_retry_attempts(victim).await.unwrap();
        assert_eq!(history.len(), 4);
        let temps: Vec<f64> = history
            .iter()
            .filter_map(|a| a.temperature_used)
            .collect();
        assert_eq!(temps, vec![0.7, 0.5, 0.3]);
    }

    #[tokio::test]
    async fn hard_cap_blocks_atom_starts() {
        let config = ExecutionConfig::default().with_caps(0.0, 0.0);
        let (h, wave) = harness(config, 5).await;

        let result = h.executor.execute_wave(&wave).await.unwrap();
        assert!(result.completed.is_empty());
        assert_eq!(result.blocked.len(), 5);
        assert_eq!(result.status(), WaveStatus::Failed);

        for atom in h.store.load_atoms(h.plan).await.unwrap() {
            assert_eq!(atom.status, AtomStatus::Blocked);
        }
    }

    #[tokio::test]
    async fn cancellation_releases_everything() {
        let config = ExecutionConfig::default()
            .with_concurrency(2, 10, 10)
            .with_caps(1e6, 1e6);
        let collaborator = SimulatedAtomExecutor::new().with_delay(Duration::from_secs(30));
        let (h, wave) = harness_with(config, 50, collaborator).await;

        let executor = h.executor.clone();
        let run = tokio::spawn(async move { executor.execute_wave(&wave).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("wave unwound promptly")
            .unwrap();
        assert!(matches!(result, Err(ExecutionError::Cancelled)));

        // No atom may be left running; interrupted work reverts to
        // pending for a future run.
        for atom in h.atoms.lock().await.values() {
            assert_ne!(atom.status, AtomStatus::Running);
            assert!(
                atom.status == AtomStatus::Pending || atom.status == AtomStatus::Completed,
                "unexpected status {:?}",
                atom.status
            );
        }
    }

    #[tokio::test]
    async fn timeout_is_classified_and_retried() {
        let config = ExecutionConfig::default()
            .with_caps(1e6, 1e6)
            .with_backoff_base(Duration::from_millis(1))
            .with_atom_timeout(Duration::from_millis(20));
        // Delay far beyond the atom timeout: every attempt times out.
        let collaborator = SimulatedAtomExecutor::new().with_delay(Duration::from_secs(60));
        let (h, wave) = harness_with(config, 1, collaborator).await;

        let result = h.executor.execute_wave(&wave).await.unwrap();
        assert_eq!(result.failed.len(), 1);

        let atom = h.store.load_atom(wave.atom_ids[0]).await.unwrap().unwrap();
        assert_eq!(atom.status, AtomStatus::Failed);
        assert_eq!(atom.last_error, Some(ErrorCategory::Timeout));
    }
}
