//! Dependency graph construction from atom symbol tables.

use std::collections::{BTreeSet, HashMap};

use atomflow_core::{Atom, AtomId, EdgeKind};
use tracing::debug;

use crate::cycles::find_cycles;
use crate::graph::{DependencyGraph, GraphDiagnostics, GraphEdge, GraphError};

/// Upper bound on enumerated simple cycles per diagnostics pass. Graphs
/// with more are pathological; the scheduler re-enumerates after each
/// edge removal anyway.
const CYCLE_ENUMERATION_CAP: usize = 1024;

/// Builds the dependency graph for one plan's atom set.
///
/// For every pair (a, b) where `a` uses a symbol `b` defines, an edge
/// `a -> b` is added with the kind of the highest-priority matching symbol
/// class. Symbol lookup is keyed by name through per-class indexes, so the
/// result does not depend on input ordering.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self
    }

    /// Build the graph and its diagnostics from the full atom set of a
    /// plan. Pure computation; no side effects.
    pub fn build(&self, atoms: &[Atom]) -> Result<(DependencyGraph, GraphDiagnostics), GraphError> {
        let nodes: Vec<AtomId> = atoms.iter().map(|a| a.id).collect();

        // Per-class symbol indexes: symbol name -> defining node indices.
        let mut defined_functions: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut defined_variables: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut defined_types: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut exported_modules: HashMap<&str, Vec<usize>> = HashMap::new();

        for (i, atom) in atoms.iter().enumerate() {
            for name in &atom.symbols.defined_functions {
                defined_functions.entry(name.as_str()).or_default().push(i);
            }
            for name in &atom.symbols.defined_variables {
                defined_variables.entry(name.as_str()).or_default().push(i);
            }
            for name in &atom.symbols.defined_types {
                defined_types.entry(name.as_str()).or_default().push(i);
            }
            for name in &atom.symbols.exported_modules {
                exported_modules.entry(name.as_str()).or_default().push(i);
            }
        }

        // One edge per node pair, keeping the highest-priority kind.
        let mut edge_kinds: HashMap<(usize, usize), EdgeKind> = HashMap::new();
        for (i, atom) in atoms.iter().enumerate() {
            Self::match_class(
                i,
                &atom.symbols.used_functions,
                &defined_functions,
                EdgeKind::FunctionCall,
                &mut edge_kinds,
            );
            Self::match_class(
                i,
                &atom.symbols.used_variables,
                &defined_variables,
                EdgeKind::Variable,
                &mut edge_kinds,
            );
            Self::match_class(
                i,
                &atom.symbols.used_types,
                &defined_types,
                EdgeKind::Type,
                &mut edge_kinds,
            );
            Self::match_class(
                i,
                &atom.symbols.imports,
                &exported_modules,
                EdgeKind::Import,
                &mut edge_kinds,
            );
        }

        let edges: Vec<GraphEdge> = edge_kinds
            .into_iter()
            .map(|((source, target), kind)| GraphEdge {
                source,
                target,
                kind,
                weight: kind.confidence(),
            })
            .collect();

        let graph = DependencyGraph::new(nodes, edges)?;
        let diagnostics = Self::diagnose(&graph);

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            cycles = diagnostics.cycles.len(),
            isolated = diagnostics.isolated_nodes.len(),
            "dependency graph built"
        );

        Ok((graph, diagnostics))
    }

    fn match_class(
        source: usize,
        used: &BTreeSet<String>,
        defined: &HashMap<&str, Vec<usize>>,
        kind: EdgeKind,
        edge_kinds: &mut HashMap<(usize, usize), EdgeKind>,
    ) {
        for name in used {
            let Some(definers) = defined.get(name.as_str()) else {
                continue;
            };
            for &target in definers {
                if target == source {
                    continue;
                }
                edge_kinds
                    .entry((source, target))
                    .and_modify(|existing| {
                        if kind.priority() < existing.priority() {
                            *existing = kind;
                        }
                    })
                    .or_insert(kind);
            }
        }
    }

    fn diagnose(graph: &DependencyGraph) -> GraphDiagnostics {
        let cycles = find_cycles(&graph.adjacency(), CYCLE_ENUMERATION_CAP)
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|i| graph.atom_id(i)).collect())
            .collect();

        let isolated_nodes = (0..graph.node_count())
            .filter(|&i| graph.deps_of(i).is_empty() && graph.dependents_of(i).is_empty())
            .map(|i| graph.atom_id(i))
            .collect();

        GraphDiagnostics {
            cycles,
            isolated_nodes,
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            density: graph.density(),
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_core::{PlanId, SymbolTable};

    fn atom_with(
        plan: PlanId,
        name: &str,
        defines_fn: &[&str],
        uses_fn: &[&str],
    ) -> Atom {
        let mut symbols = SymbolTable::default();
        symbols.defined_functions = defines_fn.iter().map(|s| s.to_string()).collect();
        symbols.used_functions = uses_fn.iter().map(|s| s.to_string()).collect();
        Atom::new(plan, name, "").with_symbols(symbols)
    }

    #[test]
    fn function_use_creates_edge() {
        let plan = PlanId::new();
        let a = atom_with(plan, "a", &["helper"], &[]);
        let b = atom_with(plan, "b", &[], &["helper"]);
        let (a_id, b_id) = (a.id, b.id);

        let (graph, diagnostics) = GraphBuilder::new().build(&[a, b]).unwrap();

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependencies(b_id), vec![a_id]);
        assert!(graph.dependencies(a_id).is_empty());
        assert!(!diagnostics.has_cycles());
    }

    #[test]
    fn self_use_creates_no_edge() {
        let plan = PlanId::new();
        // Recursive atom: defines and calls the same function.
        let a = atom_with(plan, "a", &["fact"], &["fact"]);

        let (graph, diagnostics) = GraphBuilder::new().build(&[a]).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(diagnostics.isolated_nodes.len(), 1);
    }

    #[test]
    fn highest_priority_kind_wins() {
        let plan = PlanId::new();
        let mut defining = SymbolTable::default();
        defining.defined_functions.insert("parse".to_string());
        defining.defined_types.insert("Parser".to_string());
        let a = Atom::new(plan, "a", "").with_symbols(defining);

        let mut using = SymbolTable::default();
        using.used_functions.insert("parse".to_string());
        using.used_types.insert("Parser".to_string());
        let b = Atom::new(plan, "b", "").with_symbols(using);

        let (graph, _) = GraphBuilder::new().build(&[a, b]).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges()[0].kind, EdgeKind::FunctionCall);
    }

    #[test]
    fn edge_set_is_order_independent() {
        let plan = PlanId::new();
        let a = atom_with(plan, "a", &["f"], &["g"]);
        let b = atom_with(plan, "b", &["g"], &["h"]);
        let c = atom_with(plan, "c", &["h"], &[]);

        let (forward, _) = GraphBuilder::new()
            .build(&[a.clone(), b.clone(), c.clone()])
            .unwrap();
        let (reversed, _) = GraphBuilder::new().build(&[c, b, a]).unwrap();

        let mut forward_pairs: Vec<(AtomId, AtomId)> = forward
            .edges()
            .iter()
            .map(|e| (forward.atom_id(e.source), forward.atom_id(e.target)))
            .collect();
        let mut reversed_pairs: Vec<(AtomId, AtomId)> = reversed
            .edges()
            .iter()
            .map(|e| (reversed.atom_id(e.source), reversed.atom_id(e.target)))
            .collect();
        forward_pairs.sort();
        reversed_pairs.sort();
        assert_eq!(forward_pairs, reversed_pairs);
    }

    #[test]
    fn cycle_reported_in_diagnostics() {
        let plan = PlanId::new();
        let a = atom_with(plan, "a", &["f"], &["g"]);
        let b = atom_with(plan, "b", &["g"], &["f"]);

        let (_, diagnostics) = GraphBuilder::new().build(&[a, b]).unwrap();
        assert!(diagnostics.has_cycles());
        assert_eq!(diagnostics.cycles.len(), 1);
        assert_eq!(diagnostics.cycles[0].len(), 2);
    }

    #[test]
    fn empty_input_builds_empty_graph() {
        let (graph, diagnostics) = GraphBuilder::new().build(&[]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(diagnostics.node_count, 0);
        assert_eq!(diagnostics.density, 0.0);
    }
}
