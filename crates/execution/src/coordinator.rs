//! Top-level coordination of one execution plan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atomflow_core::{
    Actor, Atom, AtomId, AtomStatus, AttemptId, BudgetState, BudgetStatus, ConcurrencySnapshot,
    ErrorCategory, Event, ExecutionConfig, ExecutionWave, PlanId, PlanStatus, RetryAttempt, Time,
};
use atomflow_graph::{CycleWarning, GraphBuilder, WaveScheduler};
use atomflow_progress::{EtaEstimator, StatusCounts};
use atomflow_storage::PlanStore;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::budget::{CostGuardrails, Notifier};
use crate::cancel::Cancellation;
use crate::collaborator::{AtomExecutor, GenerationRequest};
use crate::concurrency::AdaptiveConcurrencyController;
use crate::error::ExecutionError;
use crate::executor::{WaveExecutor, WaveResult};

/// Aggregate result of one plan run.
#[derive(Debug, Clone)]
pub struct PlanResult {
    /// The plan that ran
    pub plan_id: PlanId,
    /// Final plan status
    pub status: PlanStatus,
    /// Per-wave outcomes, in execution order
    pub waves: Vec<WaveResult>,
    /// Final per-status atom counts
    pub counts: StatusCounts,
    /// Edges dropped while breaking dependency cycles
    pub cycle_warnings: Vec<CycleWarning>,
}

/// Point-in-time view of a plan for external observers.
#[derive(Debug, Clone)]
pub struct PlanStatusReport {
    /// The plan
    pub plan_id: PlanId,
    /// Current plan status
    pub status: PlanStatus,
    /// Wave currently executing, if any
    pub current_wave: Option<usize>,
    /// Total waves in the schedule
    pub total_waves: usize,
    /// Per-status atom counts
    pub counts: StatusCounts,
    /// Budget state
    pub budget: BudgetState,
    /// Concurrency controller view
    pub concurrency: ConcurrencySnapshot,
}

/// Completion fraction and ETA for a plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanProgress {
    /// Atoms in a terminal state
    pub terminal: usize,
    /// Total atoms
    pub total: usize,
    /// Terminal fraction in [0, 1]
    pub fraction: f64,
    /// Wave currently executing, if any
    pub current_wave: Option<usize>,
    /// Estimated completion time, when enough samples exist
    pub eta: Option<Time>,
}

/// Ties graph building, wave scheduling, adaptive execution, budget
/// guardrails, and retry handling together for one plan. One plan runs at
/// a time per coordinator.
pub struct ExecutionCoordinator {
    plan_id: PlanId,
    config: ExecutionConfig,
    store: Arc<dyn PlanStore>,
    collaborator: Arc<dyn AtomExecutor>,
    controller: Arc<AdaptiveConcurrencyController>,
    guardrails: Arc<CostGuardrails>,
    cancel: Cancellation,
    atoms: Arc<Mutex<HashMap<AtomId, Atom>>>,
    estimator: Arc<Mutex<EtaEstimator>>,
    status: Mutex<PlanStatus>,
    current_wave: Mutex<Option<usize>>,
    total_waves: AtomicUsize,
}

impl ExecutionCoordinator {
    /// Create a coordinator for one plan.
    pub fn new(
        plan_id: PlanId,
        config: ExecutionConfig,
        store: Arc<dyn PlanStore>,
        collaborator: Arc<dyn AtomExecutor>,
    ) -> Self {
        let controller = Arc::new(AdaptiveConcurrencyController::new(&config));
        let guardrails = Arc::new(CostGuardrails::new(BudgetState::new(
            plan_id,
            config.soft_cap,
            config.hard_cap,
        )));
        Self {
            plan_id,
            config,
            store,
            collaborator,
            controller,
            guardrails,
            cancel: Cancellation::new(),
            atoms: Arc::new(Mutex::new(HashMap::new())),
            estimator: Arc::new(Mutex::new(EtaEstimator::default())),
            status: Mutex::new(PlanStatus::Pending),
            current_wave: Mutex::new(None),
            total_waves: AtomicUsize::new(0),
        }
    }

    /// Route budget alerts through a different notification channel.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.guardrails = Arc::new(
            CostGuardrails::new(BudgetState::new(
                self.plan_id,
                self.config.soft_cap,
                self.config.hard_cap,
            ))
            .with_notifier(notifier),
        );
        self
    }

    /// The plan this coordinator drives.
    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    /// Run the plan: build the graph, schedule waves, and drive them in
    /// order. Cancellation and a hard budget pause are normal outcomes
    /// reflected in the returned status, not errors.
    pub async fn run_plan(&self) -> Result<PlanResult, ExecutionError> {
        let atoms = self.store.load_atoms(self.plan_id).await?;
        info!(plan = %self.plan_id, atoms = atoms.len(), "plan starting");

        *self.status.lock().await = PlanStatus::Running;
        self.record_event(Actor::executor(), "plan_started", format!("{} atoms", atoms.len()), vec![])
            .await;

        // A budget saved by a previous run (e.g. before a hard pause was
        // overridden) takes precedence over the configured caps.
        match self.store.load_budget(self.plan_id).await? {
            Some(saved) => self.guardrails.restore(saved).await,
            None => self.store.save_budget(&self.guardrails.state().await).await?,
        }

        let (graph, diagnostics) = GraphBuilder::new().build(&atoms)?;
        if !diagnostics.isolated_nodes.is_empty() {
            info!(
                count = diagnostics.isolated_nodes.len(),
                "graph has isolated atoms; they schedule as singleton work"
            );
        }

        let wave_plan = WaveScheduler::new(self.config.max_wave_size).build_plan(&graph)?;
        for warning in &wave_plan.cycle_warnings {
            self.record_event(
                Actor::scheduler(),
                "cycle_edge_removed",
                warning.to_string(),
                vec![warning.source, warning.target],
            )
            .await;
        }

        {
            let mut map = self.atoms.lock().await;
            map.clear();
            for atom in atoms {
                map.insert(atom.id, atom);
            }
        }
        self.total_waves.store(wave_plan.waves.len(), Ordering::SeqCst);

        let reconcile_stop = Cancellation::new();
        let reconcile = tokio::spawn(Self::reconcile_loop(
            self.controller.clone(),
            self.guardrails.clone(),
            self.config.reconcile_interval,
            reconcile_stop.clone(),
        ));

        let executor = WaveExecutor::new(
            self.config.clone(),
            self.store.clone(),
            self.collaborator.clone(),
            self.controller.clone(),
            self.guardrails.clone(),
            Arc::new(crate::retry::RetryOrchestrator::new(
                self.config.clone(),
                self.store.clone(),
            )),
            self.atoms.clone(),
            self.estimator.clone(),
            self.cancel.clone(),
        );

        let mut wave_results = Vec::new();
        let mut cancelled = false;
        let mut paused = false;

        for wave in &wave_plan.waves {
            *self.current_wave.lock().await = Some(wave.number);

            let (runnable, mut pre_result) = self.triage_wave(&wave_plan, wave).await;

            let sub_wave = ExecutionWave::new(wave.number, runnable);
            if !sub_wave.is_empty() {
                match executor.execute_wave(&sub_wave).await {
                    Ok(result) => {
                        pre_result.completed.extend(result.completed);
                        pre_result.failed.extend(result.failed);
                        pre_result.blocked.extend(result.blocked);
                    }
                    Err(ExecutionError::Cancelled) => {
                        cancelled = true;
                        wave_results.push(pre_result);
                        break;
                    }
                    Err(e) => {
                        reconcile_stop.cancel();
                        let _ = reconcile.await;
                        return Err(e);
                    }
                }
            }
            wave_results.push(pre_result);

            if self.guardrails.state().await.status == BudgetStatus::HardPaused {
                paused = true;
                self.record_event(
                    Actor::executor(),
                    "plan_paused",
                    "hard budget cap reached".to_string(),
                    vec![],
                )
                .await;
                break;
            }
        }

        reconcile_stop.cancel();
        let _ = reconcile.await;
        *self.current_wave.lock().await = None;

        let counts = StatusCounts::from_atoms(self.atoms.lock().await.values());
        let status = if cancelled {
            PlanStatus::Cancelled
        } else if paused {
            PlanStatus::PausedBudget
        } else if counts.blocked + counts.skipped > 0 {
            PlanStatus::Blocked
        } else if counts.failed > 0 {
            PlanStatus::CompletedWithFailures
        } else {
            PlanStatus::Completed
        };

        *self.status.lock().await = status;
        if let Err(e) = self.store.save_budget(&self.guardrails.state().await).await {
            warn!(error = %e, "failed to persist final budget state");
        }
        self.record_event(
            Actor::executor(),
            "plan_finished",
            status.to_string(),
            vec![],
        )
        .await;
        info!(plan = %self.plan_id, %status, completed = counts.completed, "plan finished");

        Ok(PlanResult {
            plan_id: self.plan_id,
            status,
            waves: wave_results,
            counts,
            cycle_warnings: wave_plan.cycle_warnings.clone(),
        })
    }

    /// Partition a wave into runnable atoms and atoms settled without
    /// running: already-completed atoms from a prior run are left alone,
    /// atoms with a permanently failed dependency become blocked, and
    /// atoms downstream of a blocked atom are skipped.
    async fn triage_wave(
        &self,
        plan: &atomflow_graph::WavePlan,
        wave: &ExecutionWave,
    ) -> (Vec<AtomId>, WaveResult) {
        let mut runnable = Vec::new();
        let mut result = WaveResult::new(wave.number);
        let mut settle: Vec<(AtomId, AtomStatus)> = Vec::new();

        {
            let map = self.atoms.lock().await;
            for id in &wave.atom_ids {
                let current = map.get(id).map(|a| a.status);
                if current == Some(AtomStatus::Completed) {
                    result.completed.push(*id);
                    continue;
                }
                if current == Some(AtomStatus::Failed) {
                    result.failed.push(*id);
                    continue;
                }

                let mut verdict = None;
                for dep in plan.scheduled_dependencies(*id) {
                    match map.get(dep).map(|a| a.status) {
                        Some(AtomStatus::Completed) => {}
                        Some(AtomStatus::Failed) => {
                            verdict = Some(AtomStatus::Blocked);
                            break;
                        }
                        Some(AtomStatus::Blocked) | Some(AtomStatus::Skipped) => {
                            verdict = Some(AtomStatus::Skipped);
                            break;
                        }
                        other => {
                            error!(
                                atom = %id,
                                dependency = %dep,
                                status = ?other,
                                "dependency not terminal at wave start"
                            );
                            debug_assert!(false, "dependency not terminal at wave start");
                            verdict = Some(AtomStatus::Blocked);
                            break;
                        }
                    }
                }

                match verdict {
                    None => runnable.push(*id),
                    Some(status) => settle.push((*id, status)),
                }
            }
        }

        for (id, status) in settle {
            self.settle_atom(id, status).await;
            match status {
                AtomStatus::Blocked => result.blocked.push(id),
                AtomStatus::Skipped => result.skipped.push(id),
                _ => {}
            }
        }

        (runnable, result)
    }

    async fn settle_atom(&self, id: AtomId, status: AtomStatus) {
        let snapshot = {
            let mut map = self.atoms.lock().await;
            let Some(atom) = map.get_mut(&id) else { return };
            atom.set_status(status);
            atom.clone()
        };
        if let Err(e) = self.store.save_atom(&snapshot).await {
            warn!(atom = %id, error = %e, "atom save failed");
        }
        self.record_event(
            Actor::executor(),
            "atom_settled",
            format!("{} without execution", status),
            vec![id],
        )
        .await;
    }

    async fn reconcile_loop(
        controller: Arc<AdaptiveConcurrencyController>,
        guardrails: Arc<CostGuardrails>,
        interval: Duration,
        stop: Cancellation,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick resolves immediately; skip it so the limit is
        // not adjusted before any work ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let headroom = guardrails.headroom().await;
                    controller.reconcile(headroom);
                }
                _ = stop.cancelled() => break,
            }
        }
    }

    /// Cooperatively cancel the running plan.
    pub async fn cancel(&self) {
        info!(plan = %self.plan_id, "cancellation requested");
        self.cancel.cancel();
        self.record_event(Actor::operator(), "plan_cancelled", "cooperative cancel".to_string(), vec![])
            .await;
    }

    /// Current plan status for external observers.
    pub async fn status(&self) -> Result<PlanStatusReport, ExecutionError> {
        let counts = self.counts().await?;
        let headroom = self.guardrails.headroom().await;
        Ok(PlanStatusReport {
            plan_id: self.plan_id,
            status: *self.status.lock().await,
            current_wave: *self.current_wave.lock().await,
            total_waves: self.total_waves.load(Ordering::SeqCst),
            counts,
            budget: self.guardrails.state().await,
            concurrency: self.controller.snapshot(headroom),
        })
    }

    /// Completion fraction and ETA.
    pub async fn progress(&self) -> Result<PlanProgress, ExecutionError> {
        let counts = self.counts().await?;
        let total = counts.total();
        let terminal = counts.terminal();
        let remaining = total - terminal;
        let eta = self
            .estimator
            .lock()
            .await
            .eta(remaining, self.controller.current_limit());

        Ok(PlanProgress {
            terminal,
            total,
            fraction: counts.completion_fraction(),
            current_wave: *self.current_wave.lock().await,
            eta,
        })
    }

    /// Manually retry one permanently failed atom, outside the automatic
    /// schedule. The attempt is recorded in the retry history like any
    /// other.
    pub async fn retry_atom(&self, atom_id: AtomId) -> Result<Atom, ExecutionError> {
        let mut atom = match self.atoms.lock().await.get(&atom_id) {
            Some(atom) => atom.clone(),
            None => self
                .store
                .load_atom(atom_id)
                .await?
                .ok_or(ExecutionError::AtomNotFound(atom_id))?,
        };

        if atom.status != AtomStatus::Failed {
            return Err(ExecutionError::InvalidAtomState {
                id: atom_id,
                status: atom.status.to_string(),
                expected: AtomStatus::Failed.to_string(),
            });
        }

        let attempt = atom.retry_count + 1;
        let temperature = self
            .config
            .temperature_schedule
            .last()
            .copied()
            .unwrap_or(0.3);
        let request = GenerationRequest {
            temperature,
            attempt,
            feedback: None,
        };
        info!(atom = %atom_id, attempt, "manual retry requested");

        atom.set_status(AtomStatus::Running);
        self.persist_atom(&atom).await;

        let call = tokio::time::timeout(
            self.config.atom_timeout,
            self.collaborator.execute(&atom, &request),
        )
        .await;

        let record;
        match call {
            Ok(Ok(outcome)) if outcome.verdict.passed => {
                self.guardrails.record_cost(atom_id, outcome.cost).await;
                atom.accumulated_cost += outcome.cost;
                atom.retry_count = attempt;
                atom.set_status(AtomStatus::Completed);
                record = RetryAttempt {
                    id: AttemptId::new(),
                    atom_id,
                    attempt_number: attempt,
                    error_category: atom.last_error.unwrap_or(ErrorCategory::Unknown),
                    temperature_used: Some(temperature),
                    backoff_delay: Duration::ZERO,
                    timestamp: chrono::Utc::now(),
                    outcome: atomflow_core::AttemptOutcome::Succeeded,
                };
            }
            other => {
                let error = match other {
                    Ok(Ok(outcome)) => outcome.verdict.errors.join("; "),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "manual retry timed out".to_string(),
                };
                warn!(atom = %atom_id, error, "manual retry failed");
                atom.retry_count = attempt;
                atom.set_status(AtomStatus::Failed);
                record = RetryAttempt::gave_up(
                    atom_id,
                    attempt,
                    atom.last_error.unwrap_or(ErrorCategory::Unknown),
                );
            }
        }

        self.persist_atom(&atom).await;
        if let Err(e) = self.store.append_retry_attempt(&record).await {
            warn!(atom = %atom_id, error = %e, "failed to record manual retry");
        }
        Ok(atom)
    }

    /// Operator override for a hard budget pause.
    pub async fn raise_hard_cap(&self, new_cap: f64) -> Result<BudgetState, ExecutionError> {
        let state = self.guardrails.raise_hard_cap(new_cap).await;
        self.store.save_budget(&state).await?;
        self.record_event(
            Actor::operator(),
            "hard_cap_raised",
            format!("hard cap now {:.2}", state.hard_cap),
            vec![],
        )
        .await;
        Ok(state)
    }

    async fn counts(&self) -> Result<StatusCounts, ExecutionError> {
        let map = self.atoms.lock().await;
        if map.is_empty() {
            let atoms = self.store.load_atoms(self.plan_id).await?;
            Ok(StatusCounts::from_atoms(atoms.iter()))
        } else {
            Ok(StatusCounts::from_atoms(map.values()))
        }
    }

    async fn persist_atom(&self, atom: &Atom) {
        self.atoms.lock().await.insert(atom.id, atom.clone());
        if let Err(e) = self.store.save_atom(atom).await {
            warn!(atom = %atom.id, error = %e, "atom save failed");
        }
    }

    async fn record_event(
        &self,
        actor: Actor,
        action: &str,
        result: String,
        related: Vec<AtomId>,
    ) {
        let event = Event::new(self.plan_id, actor, action, result).with_atoms(related);
        if let Err(e) = self.store.save_event(&event).await {
            warn!(error = %e, action, "event save failed");
        }
    }
}
