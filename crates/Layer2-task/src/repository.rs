//! Task repository - where tasks and their execution history live
//!
//! [`TaskRepository`] is the persistence seam the orchestrator works through.
//! Two implementations:
//! - [`MemoryTaskRepository`] - process-local, for tests and ephemeral runs
//! - [`JsonTaskRepository`] - a single `tasks.json` document in a [`JsonStore`],
//!   shared safely between processes
//!
//! Both keep insertion order; saving an existing id replaces it in place.

use crate::task::{Task, TaskId};
use async_trait::async_trait;
use taskpod_foundation::{Error, JsonStore, Result};
use tokio::sync::RwLock;
use tracing::debug;

/// File holding every task
pub const TASKS_FILE: &str = "tasks.json";

/// Storage operations for tasks
///
/// Each call is atomic per record; read-modify-write sequences across calls
/// are the caller's concern.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>>;

    async fn find_all(&self) -> Result<Vec<Task>>;

    /// Case-insensitive substring match on name
    async fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Task>>;

    /// Case-insensitive substring match on owner
    async fn find_by_owner_contains(&self, needle: &str) -> Result<Vec<Task>>;

    async fn exists_by_id(&self, id: &TaskId) -> Result<bool>;

    /// Insert or replace by id
    async fn save(&self, task: Task) -> Result<Task>;

    async fn delete_by_id(&self, id: &TaskId) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

fn upsert(tasks: &mut Vec<Task>, task: Task) {
    match tasks.iter_mut().find(|t| t.id == task.id) {
        Some(existing) => *existing = task,
        None => tasks.push(task),
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryTaskRepository {
    tasks: RwLock<Vec<Task>>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.iter().find(|t| &t.id == id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.read().await.clone())
    }

    async fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.name_contains(needle))
            .cloned()
            .collect())
    }

    async fn find_by_owner_contains(&self, needle: &str) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.owner_contains(needle))
            .cloned()
            .collect())
    }

    async fn exists_by_id(&self, id: &TaskId) -> Result<bool> {
        Ok(self.tasks.read().await.iter().any(|t| &t.id == id))
    }

    async fn save(&self, task: Task) -> Result<Task> {
        upsert(&mut *self.tasks.write().await, task.clone());
        Ok(task)
    }

    async fn delete_by_id(&self, id: &TaskId) -> Result<()> {
        self.tasks.write().await.retain(|t| &t.id != id);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.tasks.read().await.len())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Tasks persisted as one JSON array
///
/// Nothing is cached: reads parse the file as it is now, and every mutation
/// reloads, applies, and rewrites it under the store's exclusive file lock.
/// Several processes can therefore share one data directory without losing
/// each other's records.
#[derive(Debug)]
pub struct JsonTaskRepository {
    store: JsonStore,
}

impl JsonTaskRepository {
    /// Open `tasks.json` in the store, validating it when present
    pub fn open(store: JsonStore) -> Result<Self> {
        let count = store
            .load_optional::<Vec<Task>>(TASKS_FILE)?
            .map_or(0, |tasks| tasks.len());
        debug!(
            "Opened {} ({} tasks)",
            store.file_path(TASKS_FILE).display(),
            count
        );
        Ok(Self { store })
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    async fn load(&self) -> Result<Vec<Task>> {
        let store = self.store.clone();
        blocking(move || {
            store
                .load_optional::<Vec<Task>>(TASKS_FILE)
                .map(Option::unwrap_or_default)
        })
        .await
    }

    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Task>) + Send + 'static,
    {
        let store = self.store.clone();
        blocking(move || store.update::<Vec<Task>, _>(TASKS_FILE, apply).map(|_| ())).await
    }
}

/// File I/O and lock waits stay off the async workers
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(format!("Storage task failed: {}", e)))?
}

#[async_trait]
impl TaskRepository for JsonTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.load().await?.into_iter().find(|t| &t.id == id))
    }

    async fn find_all(&self) -> Result<Vec<Task>> {
        self.load().await
    }

    async fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Task>> {
        let mut tasks = self.load().await?;
        tasks.retain(|t| t.name_contains(needle));
        Ok(tasks)
    }

    async fn find_by_owner_contains(&self, needle: &str) -> Result<Vec<Task>> {
        let mut tasks = self.load().await?;
        tasks.retain(|t| t.owner_contains(needle));
        Ok(tasks)
    }

    async fn exists_by_id(&self, id: &TaskId) -> Result<bool> {
        Ok(self.load().await?.iter().any(|t| &t.id == id))
    }

    async fn save(&self, task: Task) -> Result<Task> {
        let saved = task.clone();
        self.mutate(move |tasks| upsert(tasks, task)).await?;
        Ok(saved)
    }

    async fn delete_by_id(&self, id: &TaskId) -> Result<()> {
        let id = id.clone();
        self.mutate(move |tasks| tasks.retain(|t| t.id != id)).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }
}
