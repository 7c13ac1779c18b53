//! In-memory store for tests and single-shot runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use atomflow_core::{Atom, AtomId, BudgetState, Event, PlanId, RetryAttempt};
use tokio::sync::Mutex;

use super::{PlanStore, Result};

#[derive(Default)]
struct Inner {
    atoms: HashMap<AtomId, Atom>,
    attempts: Vec<RetryAttempt>,
    budgets: HashMap<PlanId, BudgetState>,
    events: Vec<Event>,
}

/// Non-durable store backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a plan's atoms.
    pub async fn seed_atoms(&self, atoms: &[Atom]) {
        let mut inner = self.inner.lock().await;
        for atom in atoms {
            inner.atoms.insert(atom.id, atom.clone());
        }
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn load_atoms(&self, plan_id: PlanId) -> Result<Vec<Atom>> {
        let inner = self.inner.lock().await;
        let mut atoms: Vec<Atom> = inner
            .atoms
            .values()
            .filter(|a| a.plan_id == plan_id)
            .cloned()
            .collect();
        atoms.sort_by_key(|a| a.id);
        Ok(atoms)
    }

    async fn load_atom(&self, id: AtomId) -> Result<Option<Atom>> {
        Ok(self.inner.lock().await.atoms.get(&id).cloned())
    }

    async fn save_atom(&self, atom: &Atom) -> Result<()> {
        self.inner.lock().await.atoms.insert(atom.id, atom.clone());
        Ok(())
    }

    async fn append_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        self.inner.lock().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn list_retry_attempts(&self, atom_id: AtomId) -> Result<Vec<RetryAttempt>> {
        Ok(self
            .inner
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.atom_id == atom_id)
            .cloned()
            .collect())
    }

    async fn load_budget(&self, plan_id: PlanId) -> Result<Option<BudgetState>> {
        Ok(self.inner.lock().await.budgets.get(&plan_id).cloned())
    }

    async fn save_budget(&self, state: &BudgetState) -> Result<()> {
        self.inner
            .lock()
            .await
            .budgets
            .insert(state.plan_id, state.clone());
        Ok(())
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        self.inner.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, plan_id: PlanId) -> Result<Vec<Event>> {
        Ok(self
            .inner
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.plan_id == plan_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_core::{Actor, AtomStatus, ErrorCategory};
    use std::time::Duration;

    #[tokio::test]
    async fn atom_roundtrip() {
        let store = MemoryStore::new();
        let plan = PlanId::new();
        let mut atom = Atom::new(plan, "a", "");
        store.save_atom(&atom).await.unwrap();

        atom.set_status(AtomStatus::Completed);
        store.save_atom(&atom).await.unwrap();

        let loaded = store.load_atom(atom.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AtomStatus::Completed);
        assert_eq!(store.load_atoms(plan).await.unwrap().len(), 1);
        assert!(store.load_atoms(PlanId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_history_is_append_only_per_atom() {
        let store = MemoryStore::new();
        let atom_id = AtomId::new();
        for attempt in 1..=3 {
            store
                .append_retry_attempt(&RetryAttempt::retried(
                    atom_id,
                    attempt,
                    ErrorCategory::Syntax,
                    0.7,
                    Duration::from_secs(1),
                ))
                .await
                .unwrap();
        }
        store
            .append_retry_attempt(&RetryAttempt::retried(
                AtomId::new(),
                1,
                ErrorCategory::Logic,
                0.7,
                Duration::from_secs(1),
            ))
            .await
            .unwrap();

        let history = store.list_retry_attempts(atom_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn budget_and_events_roundtrip() {
        let store = MemoryStore::new();
        let plan = PlanId::new();
        let budget = BudgetState::new(plan, 10.0, 20.0);
        store.save_budget(&budget).await.unwrap();
        assert!(store.load_budget(plan).await.unwrap().is_some());

        store
            .save_event(&Event::new(plan, Actor::scheduler(), "wave_started", "wave 0"))
            .await
            .unwrap();
        assert_eq!(store.list_events(plan).await.unwrap().len(), 1);
    }
}
