//! JSON file storage implementation.
//!
//! Stores execution state as JSON files in a per-root directory tree:
//! one file per atom, retry attempt, budget, and event. Append-only kinds
//! (attempts, events) are never rewritten; ULID file names keep listing
//! order equal to append order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use atomflow_core::{Atom, AtomId, BudgetState, Event, PlanId, RetryAttempt};
use tokio::fs;

use super::{PlanStore, Result, StoreError};

/// File-based JSON storage backend.
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Create storage rooted at a directory, creating the per-kind
    /// subdirectories as needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("atoms")).await?;
        fs::create_dir_all(root.join("attempts")).await?;
        fs::create_dir_all(root.join("budgets")).await?;
        fs::create_dir_all(root.join("events")).await?;

        Ok(Self { root })
    }

    fn atom_path(&self, id: AtomId) -> PathBuf {
        self.root.join("atoms").join(format!("{}.json", id))
    }

    fn budget_path(&self, plan_id: PlanId) -> PathBuf {
        self.root.join("budgets").join(format!("{}.json", plan_id))
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json.as_bytes()).await?;
        Ok(())
    }

    async fn read_dir_json<T: serde::de::DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
        // ULID file names sort in creation order.
        paths.sort();

        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            let text = fs::read_to_string(&path).await?;
            values.push(serde_json::from_str(&text)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl PlanStore for JsonStore {
    async fn load_atoms(&self, plan_id: PlanId) -> Result<Vec<Atom>> {
        let atoms: Vec<Atom> = self.read_dir_json(&self.root.join("atoms")).await?;
        Ok(atoms.into_iter().filter(|a| a.plan_id == plan_id).collect())
    }

    async fn load_atom(&self, id: AtomId) -> Result<Option<Atom>> {
        match fs::read_to_string(self.atom_path(id)).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save_atom(&self, atom: &Atom) -> Result<()> {
        self.write_json(&self.atom_path(atom.id), atom).await
    }

    async fn append_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        let path = self
            .root
            .join("attempts")
            .join(format!("{}.json", attempt.id));
        self.write_json(&path, attempt).await
    }

    async fn list_retry_attempts(&self, atom_id: AtomId) -> Result<Vec<RetryAttempt>> {
        let attempts: Vec<RetryAttempt> = self.read_dir_json(&self.root.join("attempts")).await?;
        let mut attempts: Vec<RetryAttempt> = attempts
            .into_iter()
            .filter(|a| a.atom_id == atom_id)
            .collect();
        // Attempt numbers are unique per atom; ULID file-name order can
        // tie within one millisecond.
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn load_budget(&self, plan_id: PlanId) -> Result<Option<BudgetState>> {
        match fs::read_to_string(self.budget_path(plan_id)).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save_budget(&self, state: &BudgetState) -> Result<()> {
        self.write_json(&self.budget_path(state.plan_id), state).await
    }

    async fn save_event(&self, event: &Event) -> Result<()> {
        let path = self.root.join("events").join(format!("{}.json", event.id));
        self.write_json(&path, event).await
    }

    async fn list_events(&self, plan_id: PlanId) -> Result<Vec<Event>> {
        let events: Vec<Event> = self.read_dir_json(&self.root.join("events")).await?;
        Ok(events.into_iter().filter(|e| e.plan_id == plan_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomflow_core::{Actor, AtomStatus, ErrorCategory};
    use std::time::Duration;

    #[tokio::test]
    async fn atom_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        let plan = PlanId::new();
        let mut atom = Atom::new(plan, "lexer", "fn lex() {}");
        store.save_atom(&atom).await.unwrap();

        atom.set_status(AtomStatus::Running);
        store.save_atom(&atom).await.unwrap();

        let loaded = store.load_atom(atom.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AtomStatus::Running);
        assert_eq!(loaded.name, "lexer");

        assert!(store.load_atom(AtomId::new()).await.unwrap().is_none());
        assert_eq!(store.load_atoms(plan).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attempts_and_events_listed_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        let plan = PlanId::new();
        let atom_id = AtomId::new();
        for attempt in 1..=2 {
            store
                .append_retry_attempt(&RetryAttempt::retried(
                    atom_id,
                    attempt,
                    ErrorCategory::Timeout,
                    0.7,
                    Duration::from_secs(1),
                ))
                .await
                .unwrap();
        }
        let history = store.list_retry_attempts(atom_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt_number, 1);

        store
            .save_event(&Event::new(plan, Actor::executor(), "atom_failed", "timeout"))
            .await
            .unwrap();
        assert_eq!(store.list_events(plan).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn budget_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();

        let plan = PlanId::new();
        let mut budget = BudgetState::new(plan, 5.0, 10.0);
        budget.add_cost(7.5);
        store.save_budget(&budget).await.unwrap();

        let loaded = store.load_budget(plan).await.unwrap().unwrap();
        assert_eq!(loaded.accumulated_cost, 7.5);
        assert_eq!(loaded.status, atomflow_core::BudgetStatus::SoftExceeded);
    }
}
