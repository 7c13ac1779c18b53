//! Arena-based dependency graph over the atoms of one plan.
//!
//! Nodes are atom indices into an arena, edges an index-pair list with
//! forward and reverse adjacency. No object back-references: cycle handling
//! stays a pure index-based algorithm.

use std::collections::HashMap;

use atomflow_core::{AtomId, DependencyEdge, EdgeKind};

/// Errors from graph construction.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The same atom id appeared twice in the input set
    #[error("duplicate atom id: {0}")]
    DuplicateAtom(AtomId),

    /// An atom ended up depending on itself; should be impossible
    #[error("atom {0} depends on itself")]
    SelfDependency(AtomId),

    /// A cycle survived feedback-arc breaking; should be impossible
    #[error("cycle survived feedback-arc breaking")]
    ResidualCycle,
}

/// One directed edge, stored over arena indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    /// Index of the dependent atom
    pub source: usize,
    /// Index of the atom that must complete first
    pub target: usize,
    /// Symbol class that produced the edge
    pub kind: EdgeKind,
    /// Inference confidence, diagnostics only
    pub weight: f64,
}

/// The dependency graph of one plan. Immutable once built; a rebuild
/// produces a new graph object.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<AtomId>,
    index: HashMap<AtomId, usize>,
    edges: Vec<GraphEdge>,
    /// deps[i] = indices i depends on (edge direction source -> target)
    deps: Vec<Vec<usize>>,
    /// dependents[i] = indices that depend on i
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub(crate) fn new(nodes: Vec<AtomId>, edges: Vec<GraphEdge>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, id) in nodes.iter().enumerate() {
            if index.insert(*id, i).is_some() {
                return Err(GraphError::DuplicateAtom(*id));
            }
        }

        let mut deps = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for edge in &edges {
            if edge.source == edge.target {
                return Err(GraphError::SelfDependency(nodes[edge.source]));
            }
            deps[edge.source].push(edge.target);
            dependents[edge.target].push(edge.source);
        }

        Ok(Self {
            nodes,
            index,
            edges,
            deps,
            dependents,
        })
    }

    /// Number of atoms.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// True when the graph has no atoms.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Edge density: edges / (n * (n - 1)).
    pub fn density(&self) -> f64 {
        let n = self.nodes.len();
        if n < 2 {
            return 0.0;
        }
        self.edges.len() as f64 / (n as f64 * (n as f64 - 1.0))
    }

    /// Atom id at an arena index.
    pub fn atom_id(&self, idx: usize) -> AtomId {
        self.nodes[idx]
    }

    /// Arena index for an atom id.
    pub fn index_of(&self, id: AtomId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// All atom ids in arena order.
    pub fn atom_ids(&self) -> &[AtomId] {
        &self.nodes
    }

    /// The edge list.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// The edge list as id-based dependency records.
    pub fn dependency_edges(&self) -> Vec<DependencyEdge> {
        self.edges
            .iter()
            .map(|e| DependencyEdge {
                source: self.nodes[e.source],
                target: self.nodes[e.target],
                kind: e.kind,
                weight: e.weight,
            })
            .collect()
    }

    /// Indices the given index depends on.
    pub fn deps_of(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    /// Indices depending on the given index.
    pub fn dependents_of(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// Atom ids the given atom depends on.
    pub fn dependencies(&self, id: AtomId) -> Vec<AtomId> {
        match self.index_of(id) {
            Some(idx) => self.deps[idx].iter().map(|&d| self.nodes[d]).collect(),
            None => Vec::new(),
        }
    }

    /// Forward adjacency as an owned structure the scheduler can prune.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        self.deps.clone()
    }
}

/// Diagnostics produced alongside a graph build.
#[derive(Debug, Clone)]
pub struct GraphDiagnostics {
    /// Simple cycles found in the graph, as atom-id loops
    pub cycles: Vec<Vec<AtomId>>,
    /// Atoms with no edges in either direction
    pub isolated_nodes: Vec<AtomId>,
    /// Node count at build time
    pub node_count: usize,
    /// Edge count at build time
    pub edge_count: usize,
    /// Edge density at build time
    pub density: f64,
}

impl GraphDiagnostics {
    /// Whether the graph contained at least one cycle.
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}
