//! Wave scheduling: cycle breaking, topological levels, wave splitting.

use std::collections::{HashMap, VecDeque};

use atomflow_core::{AtomId, ExecutionWave};
use tracing::{error, warn};

use crate::cycles::find_cycles;
use crate::graph::{DependencyGraph, GraphError};

const CYCLE_ENUMERATION_CAP: usize = 1024;

/// A dependency edge dropped while breaking cycles. The removal is a
/// scheduling decision only; the atoms' own symbol tables keep the full
/// dependency information for audit.
#[derive(Debug, Clone)]
pub struct CycleWarning {
    /// Dependent side of the removed edge
    pub source: AtomId,
    /// Dependency side of the removed edge
    pub target: AtomId,
    /// How many of the then-known cycles this edge participated in
    pub cycles_broken: usize,
}

impl std::fmt::Display for CycleWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dropped dependency {} -> {} to break {} cycle(s)",
            self.source, self.target, self.cycles_broken
        )
    }
}

/// The ordered wave assignment for one plan.
#[derive(Debug, Clone)]
pub struct WavePlan {
    /// Waves in execution order
    pub waves: Vec<ExecutionWave>,
    /// Whether the input graph contained cycles
    pub has_cycles: bool,
    /// One warning per edge removed during cycle breaking
    pub cycle_warnings: Vec<CycleWarning>,
    wave_index: HashMap<AtomId, usize>,
    scheduled_deps: HashMap<AtomId, Vec<AtomId>>,
}

impl WavePlan {
    /// Total number of atoms across all waves.
    pub fn total_atoms(&self) -> usize {
        self.waves.iter().map(|w| w.len()).sum()
    }

    /// The wave an atom was assigned to.
    pub fn wave_of(&self, id: AtomId) -> Option<usize> {
        self.wave_index.get(&id).copied()
    }

    /// The dependencies the schedule actually ordered an atom behind:
    /// the atom's graph dependencies minus any edges dropped while
    /// breaking cycles.
    pub fn scheduled_dependencies(&self, id: AtomId) -> &[AtomId] {
        self.scheduled_deps.get(&id).map_or(&[], |deps| deps.as_slice())
    }
}

/// Groups atoms into ordered waves of maximal safe parallelism.
///
/// Residual cycles are broken with a greedy feedback-arc heuristic: the
/// edge participating in the most currently-known cycles is removed until
/// the graph is acyclic. Greedy, not guaranteed minimum.
pub struct WaveScheduler {
    max_wave_size: usize,
}

impl WaveScheduler {
    /// Create a scheduler with the given wave size ceiling.
    pub fn new(max_wave_size: usize) -> Self {
        Self { max_wave_size }
    }

    /// Build the wave plan for a graph.
    ///
    /// Invariant on success: every dependency of an atom in wave `k`
    /// (under the pruned, acyclic edge set) lies in some wave `< k`.
    pub fn build_plan(&self, graph: &DependencyGraph) -> Result<WavePlan, GraphError> {
        let mut adjacency = graph.adjacency();
        let cycle_warnings = Self::break_cycles(graph, &mut adjacency);

        let levels = Self::assign_levels(graph, &adjacency)?;

        // Group by level, then split oversized levels into sequential
        // sub-waves. Sub-waves of one level stay internally parallel.
        let level_count = levels.iter().copied().max().map_or(0, |m| m + 1);
        let mut by_level: Vec<Vec<usize>> = vec![Vec::new(); level_count];
        for (node, &level) in levels.iter().enumerate() {
            by_level[level].push(node);
        }

        let mut waves = Vec::new();
        let mut wave_index = HashMap::new();
        for members in by_level {
            for chunk in members.chunks(self.max_wave_size.max(1)) {
                let number = waves.len();
                let atom_ids: Vec<AtomId> = chunk.iter().map(|&i| graph.atom_id(i)).collect();
                for id in &atom_ids {
                    wave_index.insert(*id, number);
                }
                waves.push(ExecutionWave::new(number, atom_ids));
            }
        }

        let mut scheduled_deps: HashMap<AtomId, Vec<AtomId>> = HashMap::new();
        for (node, deps) in adjacency.iter().enumerate() {
            let ids: Vec<AtomId> = deps.iter().map(|&d| graph.atom_id(d)).collect();
            if !ids.is_empty() {
                scheduled_deps.insert(graph.atom_id(node), ids);
            }
        }

        let plan = WavePlan {
            has_cycles: !cycle_warnings.is_empty(),
            cycle_warnings,
            waves,
            wave_index,
            scheduled_deps,
        };
        Self::check_wave_invariant(graph, &adjacency, &plan);
        Ok(plan)
    }

    /// Greedy feedback-arc-set pass over the adjacency. Each iteration
    /// removes one edge, so the loop terminates after at most |E| rounds.
    fn break_cycles(graph: &DependencyGraph, adjacency: &mut [Vec<usize>]) -> Vec<CycleWarning> {
        let mut warnings = Vec::new();

        loop {
            let cycles = find_cycles(adjacency, CYCLE_ENUMERATION_CAP);
            if cycles.is_empty() {
                break;
            }

            let mut edge_counts: HashMap<(usize, usize), usize> = HashMap::new();
            for cycle in &cycles {
                for i in 0..cycle.len() {
                    let edge = (cycle[i], cycle[(i + 1) % cycle.len()]);
                    *edge_counts.entry(edge).or_insert(0) += 1;
                }
            }

            // Pick the edge occurring in the most cycles; ties broken by
            // index order so the choice is stable for a given adjacency.
            let (&(source, target), &count) = edge_counts
                .iter()
                .max_by_key(|(&(s, t), &c)| (c, std::cmp::Reverse((s, t))))
                .expect("non-empty cycle set yields edges");

            adjacency[source].retain(|&t| t != target);

            let warning = CycleWarning {
                source: graph.atom_id(source),
                target: graph.atom_id(target),
                cycles_broken: count,
            };
            warn!(%warning, "breaking dependency cycle");
            warnings.push(warning);
        }

        warnings
    }

    /// Kahn level assignment over the acyclic adjacency: level 0 atoms
    /// have no remaining dependencies, level k atoms depend only on
    /// levels < k.
    fn assign_levels(
        graph: &DependencyGraph,
        adjacency: &[Vec<usize>],
    ) -> Result<Vec<usize>, GraphError> {
        let n = adjacency.len();
        let mut remaining: Vec<usize> = adjacency.iter().map(|deps| deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (node, deps) in adjacency.iter().enumerate() {
            for &dep in deps {
                if dep == node {
                    error!(atom = %graph.atom_id(node), "self-dependency survived cycle breaking");
                    return Err(GraphError::SelfDependency(graph.atom_id(node)));
                }
                dependents[dep].push(node);
            }
        }

        let mut levels = vec![0usize; n];
        let mut queue: VecDeque<usize> =
            (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut processed = 0;

        while let Some(node) = queue.pop_front() {
            processed += 1;
            for &dependent in &dependents[node] {
                levels[dependent] = levels[dependent].max(levels[node] + 1);
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if processed != n {
            // Should be impossible after break_cycles.
            error!("cycle survived feedback-arc breaking");
            debug_assert!(false, "cycle survived feedback-arc breaking");
            return Err(GraphError::ResidualCycle);
        }

        Ok(levels)
    }

    fn check_wave_invariant(graph: &DependencyGraph, adjacency: &[Vec<usize>], plan: &WavePlan) {
        for wave in &plan.waves {
            for id in &wave.atom_ids {
                let Some(node) = graph.index_of(*id) else {
                    continue;
                };
                for &dep in &adjacency[node] {
                    let dep_wave = plan.wave_of(graph.atom_id(dep));
                    if dep_wave.map_or(true, |w| w >= wave.number) {
                        error!(
                            atom = %id,
                            dependency = %graph.atom_id(dep),
                            wave = wave.number,
                            "wave ordering invariant violated"
                        );
                        debug_assert!(false, "wave ordering invariant violated");
                    }
                }
            }
        }
    }
}
