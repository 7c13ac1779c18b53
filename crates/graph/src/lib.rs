//! Dependency graph construction and wave scheduling.
//!
//! The graph builder derives directed dependency edges from atom symbol
//! tables; the wave scheduler breaks residual cycles and groups atoms into
//! ordered waves of maximal safe parallelism.

#![warn(missing_docs)]

mod builder;
mod cycles;
mod graph;
mod scheduler;

pub use builder::GraphBuilder;
pub use graph::{DependencyGraph, GraphDiagnostics, GraphEdge, GraphError};
pub use scheduler::{CycleWarning, WavePlan, WaveScheduler};
