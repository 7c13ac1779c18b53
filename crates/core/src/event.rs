//! Event model - append-only audit records of the execution timeline.

use serde::{Deserialize, Serialize};

use crate::id::{AtomId, EventId, PlanId};
use crate::Time;

/// An event is an atomic record of something that happened while a plan was
/// being scheduled or executed: a cycle-breaking edge removal, a budget
/// threshold crossing, a plan lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: EventId,

    /// Owning plan
    pub plan_id: PlanId,

    /// When it happened
    pub timestamp: Time,

    /// Who performed the action
    pub actor: Actor,

    /// What action was taken
    pub action: String,

    /// What the result was
    pub result: String,

    /// Atoms related to this event
    pub related_atoms: Vec<AtomId>,
}

impl Event {
    /// Create a new event.
    pub fn new(
        plan_id: PlanId,
        actor: Actor,
        action: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            plan_id,
            timestamp: chrono::Utc::now(),
            actor,
            action: action.into(),
            result: result.into(),
            related_atoms: Vec::new(),
        }
    }

    /// Attach related atoms.
    pub fn with_atoms(mut self, atoms: Vec<AtomId>) -> Self {
        self.related_atoms = atoms;
        self
    }
}

/// Identifier for whoever caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(pub String);

impl Actor {
    /// Create a named actor.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The scheduler itself
    pub fn scheduler() -> Self {
        Self("scheduler".to_string())
    }

    /// The execution core
    pub fn executor() -> Self {
        Self("executor".to_string())
    }

    /// A human operator
    pub fn operator() -> Self {
        Self("operator".to_string())
    }
}
