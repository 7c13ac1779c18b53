//! Dependency edges between atoms.

use serde::{Deserialize, Serialize};

use crate::id::AtomId;

/// A directed dependency: `source` depends on `target`, so `target` must
/// complete first. Self-edges are never constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The dependent atom
    pub source: AtomId,

    /// The atom that must complete first
    pub target: AtomId,

    /// Which symbol class produced this edge
    pub kind: EdgeKind,

    /// Confidence of the inferred dependency in [0, 1].
    /// Used only for diagnostics, never for ordering.
    pub weight: f64,
}

impl DependencyEdge {
    /// Create an edge with the kind's default confidence weight.
    pub fn new(source: AtomId, target: AtomId, kind: EdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
            weight: kind.confidence(),
        }
    }
}

/// Symbol class that produced a dependency edge.
///
/// When a pair of atoms matches in several classes, the edge keeps the
/// highest-priority kind: function call > variable > type > import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// The source calls a function the target defines
    FunctionCall,
    /// The source reads a variable the target defines
    Variable,
    /// The source references a type the target defines
    Type,
    /// The source imports a module the target exports
    Import,
    /// Explicit data-flow relation supplied by upstream decomposition
    DataFlow,
}

impl EdgeKind {
    /// Priority for edge-kind selection; lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            EdgeKind::FunctionCall => 0,
            EdgeKind::Variable => 1,
            EdgeKind::Type => 2,
            EdgeKind::DataFlow => 3,
            EdgeKind::Import => 4,
        }
    }

    /// Default confidence weight for edges of this kind.
    pub fn confidence(&self) -> f64 {
        match self {
            EdgeKind::FunctionCall => 1.0,
            EdgeKind::Variable => 0.9,
            EdgeKind::Type => 0.8,
            EdgeKind::DataFlow => 0.7,
            EdgeKind::Import => 0.6,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeKind::FunctionCall => "function_call",
            EdgeKind::Variable => "variable",
            EdgeKind::Type => "type",
            EdgeKind::Import => "import",
            EdgeKind::DataFlow => "data_flow",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_priority_ordering() {
        assert!(EdgeKind::FunctionCall.priority() < EdgeKind::Variable.priority());
        assert!(EdgeKind::Variable.priority() < EdgeKind::Type.priority());
        assert!(EdgeKind::Type.priority() < EdgeKind::Import.priority());
    }

    #[test]
    fn new_edge_takes_kind_confidence() {
        let edge = DependencyEdge::new(AtomId::new(), AtomId::new(), EdgeKind::Variable);
        assert_eq!(edge.weight, EdgeKind::Variable.confidence());
        assert_eq!(edge.kind, EdgeKind::Variable);
    }

    #[test]
    fn confidence_in_unit_range() {
        for kind in [
            EdgeKind::FunctionCall,
            EdgeKind::Variable,
            EdgeKind::Type,
            EdgeKind::Import,
            EdgeKind::DataFlow,
        ] {
            let w = kind.confidence();
            assert!((0.0..=1.0).contains(&w));
        }
    }
}
