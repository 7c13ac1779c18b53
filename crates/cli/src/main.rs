//! Atomflow CLI - wave-based execution of generated-code atoms.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, Level};

use atomflow_core::{Atom, AtomId, ExecutionConfig, PlanId, SymbolTable};
use atomflow_execution::{
    ExecutionCoordinator, RetryStats, SimulatedAtomExecutor, WebhookNotifier,
};
use atomflow_graph::{GraphBuilder, WaveScheduler};
use atomflow_progress::PlanTracker;
use atomflow_storage::{JsonStore, PlanStore};

#[derive(Parser)]
#[command(name = "atomflow")]
#[command(about = "Wave-based executor for generated-code atoms", long_about = None)]
struct Cli {
    /// Storage directory
    #[arg(long, default_value = ".atomflow")]
    storage: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dependency graph and wave schedule without executing
    Plan {
        /// Atoms JSON file
        atoms: PathBuf,
    },
    /// Execute a plan from an atoms file (simulated collaborator)
    Run {
        /// Atoms JSON file
        atoms: PathBuf,
        /// Soft budget cap
        #[arg(long, default_value = "50.0")]
        soft_cap: f64,
        /// Hard budget cap
        #[arg(long, default_value = "100.0")]
        hard_cap: f64,
        /// Concurrency ceiling
        #[arg(long, default_value = "100")]
        max_concurrency: usize,
        /// Webhook URL for budget alerts
        #[arg(long)]
        webhook: Option<String>,
    },
    /// Show per-status atom counts and budget for a plan
    Status {
        /// Plan ID
        plan: String,
    },
    /// Show one atom with its retry history
    Show {
        /// Atom ID
        id: String,
    },
    /// Show retry statistics for a plan
    Stats {
        /// Plan ID
        plan: String,
    },
    /// Raise the hard budget cap of a paused plan
    RaiseCap {
        /// Plan ID
        plan: String,
        /// New hard cap
        cap: f64,
    },
}

/// One atom as written in an input file.
#[derive(Debug, Deserialize)]
struct AtomSpec {
    name: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    symbols: SymbolTable,
    #[serde(default)]
    estimated_cost: f64,
}

impl AtomSpec {
    fn into_atom(self, plan_id: PlanId) -> Atom {
        Atom::new(plan_id, self.name, self.source)
            .with_symbols(self.symbols)
            .with_estimated_cost(self.estimated_cost)
    }
}

fn load_specs(path: &PathBuf) -> Result<Vec<AtomSpec>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let store = Arc::new(JsonStore::new(&cli.storage).await?);

    match cli.command {
        Commands::Plan { atoms } => {
            let plan_id = PlanId::new();
            let atoms: Vec<Atom> = load_specs(&atoms)?
                .into_iter()
                .map(|spec| spec.into_atom(plan_id))
                .collect();

            let (graph, diagnostics) = GraphBuilder::new().build(&atoms)?;
            let plan = WaveScheduler::new(ExecutionConfig::default().max_wave_size)
                .build_plan(&graph)?;

            println!("Atoms: {}", diagnostics.node_count);
            println!("Edges: {} (density {:.4})", diagnostics.edge_count, diagnostics.density);
            let mut by_kind: std::collections::HashMap<_, usize> = Default::default();
            for edge in graph.dependency_edges() {
                *by_kind.entry(edge.kind).or_default() += 1;
            }
            for (kind, count) in &by_kind {
                println!("  {}: {}", kind, count);
            }
            println!("Cycles: {}", diagnostics.cycles.len());
            println!("Isolated atoms: {}", diagnostics.isolated_nodes.len());
            for warning in &plan.cycle_warnings {
                println!("  warning: {}", warning);
            }
            println!("Waves: {}", plan.waves.len());
            for wave in &plan.waves {
                let names: Vec<String> = wave
                    .atom_ids
                    .iter()
                    .map(|id| {
                        atoms
                            .iter()
                            .find(|a| a.id == *id)
                            .map(|a| a.name.clone())
                            .unwrap_or_else(|| id.to_string())
                    })
                    .collect();
                println!("  wave {}: {}", wave.number, names.join(", "));
            }
        }
        Commands::Run {
            atoms,
            soft_cap,
            hard_cap,
            max_concurrency,
            webhook,
        } => {
            let plan_id = PlanId::new();
            let atoms: Vec<Atom> = load_specs(&atoms)?
                .into_iter()
                .map(|spec| spec.into_atom(plan_id))
                .collect();
            for atom in &atoms {
                store.save_atom(atom).await?;
            }

            let config = ExecutionConfig::default()
                .with_caps(soft_cap, hard_cap)
                .with_concurrency(2, max_concurrency.min(20), max_concurrency);

            let mut coordinator = ExecutionCoordinator::new(
                plan_id,
                config,
                store.clone(),
                Arc::new(SimulatedAtomExecutor::new()),
            );
            if let Some(url) = webhook {
                coordinator = coordinator.with_notifier(Arc::new(WebhookNotifier::new(url)));
            }

            println!("Plan: {}", plan_id);
            let result = coordinator.run_plan().await?;

            info!(status = %result.status, "plan finished");
            println!("Status: {}", result.status);
            println!(
                "Atoms: {} completed, {} failed, {} blocked, {} skipped",
                result.counts.completed,
                result.counts.failed,
                result.counts.blocked,
                result.counts.skipped,
            );
            for warning in &result.cycle_warnings {
                println!("  cycle warning: {}", warning);
            }
        }
        Commands::Status { plan } => {
            let plan_id: PlanId = plan.parse().map_err(|_| anyhow::anyhow!("Invalid plan ID"))?;
            let counts = PlanTracker::new(store.clone()).counts(plan_id).await?;
            if counts.total() == 0 {
                println!("Plan not found or has no atoms");
                return Ok(());
            }
            println!("Plan: {}", plan_id);
            println!("  pending: {}", counts.pending);
            println!("  running: {}", counts.running);
            println!("  retrying: {}", counts.retrying);
            println!("  completed: {}", counts.completed);
            println!("  failed: {}", counts.failed);
            println!("  blocked: {}", counts.blocked);
            println!("  skipped: {}", counts.skipped);
            println!("  progress: {:.1}%", counts.completion_fraction() * 100.0);

            if let Some(budget) = store.load_budget(plan_id).await? {
                println!(
                    "Budget: {:.2} spent, soft {:.2}, hard {:.2} ({})",
                    budget.accumulated_cost, budget.soft_cap, budget.hard_cap, budget.status
                );
            }

            let events = store.list_events(plan_id).await?;
            if !events.is_empty() {
                println!("Recent events:");
                for event in events.iter().rev().take(5).rev() {
                    println!("  {} | {} | {}", event.timestamp, event.action, event.result);
                }
            }
        }
        Commands::Show { id } => {
            let atom_id: AtomId = id.parse().map_err(|_| anyhow::anyhow!("Invalid atom ID"))?;
            let Some(atom) = store.load_atom(atom_id).await? else {
                println!("Atom not found");
                return Ok(());
            };

            println!("Atom: {}", atom.id);
            println!("  Name: {}", atom.name);
            println!("  Status: {}", atom.status);
            println!("  Cost: {:.2} (estimated {:.2})", atom.accumulated_cost, atom.estimated_cost);
            println!("  Retries: {}", atom.retry_count);
            if let Some(category) = atom.last_error {
                println!("  Last error: {}", category);
            }

            let history = store.list_retry_attempts(atom_id).await?;
            if !history.is_empty() {
                println!("  History:");
                for attempt in history {
                    println!(
                        "    attempt {} | {} | temp {} | {:?}",
                        attempt.attempt_number,
                        attempt.error_category,
                        attempt
                            .temperature_used
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        attempt.outcome,
                    );
                }
            }
        }
        Commands::Stats { plan } => {
            let plan_id: PlanId = plan.parse().map_err(|_| anyhow::anyhow!("Invalid plan ID"))?;
            let atoms = store.load_atoms(plan_id).await?;

            let mut history = Vec::new();
            for atom in &atoms {
                history.extend(store.list_retry_attempts(atom.id).await?);
            }
            let stats = RetryStats::from_history(&history);

            println!("Plan: {}", plan_id);
            println!("Total attempts: {}", stats.total_attempts);
            for (category, per_category) in &stats.by_category {
                println!(
                    "  {}: {} attempts, {:.0}% success",
                    category,
                    per_category.attempts,
                    per_category.success_rate() * 100.0
                );
            }
            if let Some(average) = stats.average_attempts_to_success {
                println!("Average attempts to success: {:.2}", average);
            }
        }
        Commands::RaiseCap { plan, cap } => {
            let plan_id: PlanId = plan.parse().map_err(|_| anyhow::anyhow!("Invalid plan ID"))?;
            let Some(mut budget) = store.load_budget(plan_id).await? else {
                println!("Plan has no budget state");
                return Ok(());
            };

            budget.raise_hard_cap(cap);
            store.save_budget(&budget).await?;
            println!(
                "Hard cap raised to {:.2}; budget status: {}",
                budget.hard_cap, budget.status
            );
        }
    }

    Ok(())
}
