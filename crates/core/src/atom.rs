//! Atom model - the smallest schedulable unit of generated-code work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::id::{AtomId, PlanId};
use crate::retry::ErrorCategory;
use crate::Time;

/// An atom is a small unit of code-generation work produced by upstream
/// decomposition. The source blob is opaque to the execution core; only the
/// symbol table participates in dependency inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// Unique identifier
    pub id: AtomId,

    /// Owning execution plan
    pub plan_id: PlanId,

    /// Short human-readable name (usually the primary defined symbol)
    pub name: String,

    /// Source code or description blob, opaque to the core
    pub source: String,

    /// Symbol usage summary extracted by upstream decomposition
    pub symbols: SymbolTable,

    /// Current status
    pub status: AtomStatus,

    /// Estimated cost of one generation attempt
    pub estimated_cost: f64,

    /// Cost accumulated across all attempts so far
    pub accumulated_cost: f64,

    /// Number of automatic retry attempts consumed
    pub retry_count: u32,

    /// Category of the most recent failure, if any
    pub last_error: Option<ErrorCategory>,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Atom {
    /// Create a new pending atom for a plan.
    pub fn new(plan_id: PlanId, name: impl Into<String>, source: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: AtomId::new(),
            plan_id,
            name: name.into(),
            source: source.into(),
            symbols: SymbolTable::default(),
            status: AtomStatus::Pending,
            estimated_cost: 0.0,
            accumulated_cost: 0.0,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the symbol table.
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = symbols;
        self
    }

    /// Set the estimated per-attempt cost.
    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Transition to a new status, stamping `updated_at`.
    pub fn set_status(&mut self, status: AtomStatus) {
        self.status = status;
        self.updated_at = chrono::Utc::now();
    }
}

/// Symbol usage summary for one atom.
///
/// Sets, not vectors: dependency edges are derived by symbol-name lookup and
/// must not depend on the order atoms or symbols were listed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    /// Functions this atom defines
    pub defined_functions: BTreeSet<String>,

    /// Functions this atom calls
    pub used_functions: BTreeSet<String>,

    /// Variables this atom defines
    pub defined_variables: BTreeSet<String>,

    /// Variables this atom reads
    pub used_variables: BTreeSet<String>,

    /// Types this atom defines
    pub defined_types: BTreeSet<String>,

    /// Types this atom references
    pub used_types: BTreeSet<String>,

    /// Module names this atom exports
    pub exported_modules: BTreeSet<String>,

    /// Module names this atom imports
    pub imports: BTreeSet<String>,
}

impl SymbolTable {
    /// True when the atom neither defines nor uses any symbol.
    pub fn is_empty(&self) -> bool {
        self.defined_functions.is_empty()
            && self.used_functions.is_empty()
            && self.defined_variables.is_empty()
            && self.used_variables.is_empty()
            && self.defined_types.is_empty()
            && self.used_types.is_empty()
            && self.exported_modules.is_empty()
            && self.imports.is_empty()
    }
}

/// Atom lifecycle status.
///
/// `Retrying` is the transient failed-retrying state between attempts;
/// `Failed` is terminal (retries exhausted). `Blocked` means a dependency
/// permanently failed; `Skipped` means the plan stopped before the atom's
/// wave was reached. Neither consumes a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomStatus {
    /// Waiting for its wave
    Pending,
    /// Dependencies satisfied, eligible to start
    Ready,
    /// Currently executing
    Running,
    /// Failed, waiting for the next automatic attempt
    Retrying,
    /// Completed successfully
    Completed,
    /// Retries exhausted
    Failed,
    /// A dependency permanently failed; never attempted
    Blocked,
    /// Plan stopped before this atom was reached
    Skipped,
}

impl AtomStatus {
    /// Whether this status ends the atom's lifecycle for the current run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AtomStatus::Completed | AtomStatus::Failed | AtomStatus::Blocked | AtomStatus::Skipped
        )
    }
}

impl std::fmt::Display for AtomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AtomStatus::Pending => "pending",
            AtomStatus::Ready => "ready",
            AtomStatus::Running => "running",
            AtomStatus::Retrying => "retrying",
            AtomStatus::Completed => "completed",
            AtomStatus::Failed => "failed",
            AtomStatus::Blocked => "blocked",
            AtomStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(AtomStatus::Completed.is_terminal());
        assert!(AtomStatus::Failed.is_terminal());
        assert!(AtomStatus::Blocked.is_terminal());
        assert!(AtomStatus::Skipped.is_terminal());
        assert!(!AtomStatus::Pending.is_terminal());
        assert!(!AtomStatus::Ready.is_terminal());
        assert!(!AtomStatus::Running.is_terminal());
        assert!(!AtomStatus::Retrying.is_terminal());
    }

    #[test]
    fn set_status_bumps_updated_at() {
        let mut atom = Atom::new(PlanId::new(), "parse_header", "fn parse_header() {}");
        let before = atom.updated_at;
        atom.set_status(AtomStatus::Running);
        assert_eq!(atom.status, AtomStatus::Running);
        assert!(atom.updated_at >= before);
    }

    #[test]
    fn empty_symbol_table() {
        let mut symbols = SymbolTable::default();
        assert!(symbols.is_empty());
        symbols.used_functions.insert("open".to_string());
        assert!(!symbols.is_empty());
    }
}
