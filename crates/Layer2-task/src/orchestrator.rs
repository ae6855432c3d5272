//! Task Orchestrator - task lifecycle and execution
//!
//! Owns the task operations callers see:
//!
//! - save / get / search / delete against a [`TaskRepository`]
//! - `execute`: pick a backend, run the stored command, record the result
//!
//! ## Backend selection
//!
//! The sandbox executor is used whenever it reports itself available,
//! otherwise the local executor. Execution failures never reach the caller:
//! they are recorded as an [`Execution`] whose output starts with `Error: `.
//!
//! ## Concurrency
//!
//! Mutations of one task (`save_task`, `execute`, `delete_task`) hold a per-id
//! async lock for their read-modify-write, so concurrent executions of the
//! same task each land in its history. A lock's table entry lives only while
//! some call holds or waits on it.
//!
//! ```ignore
//! let orchestrator = TaskOrchestrator::new(repo, sandbox, local);
//!
//! let task = orchestrator
//!     .save_task(Task::new("Deploy", "John Doe", "echo Deploying application"))
//!     .await?;
//! let execution = orchestrator.execute(&task.id).await?;
//! println!("{}", execution.output);
//! ```

use crate::executor::{CommandPolicy, Executor, RejectionReason};
use crate::repository::TaskRepository;
use crate::sample::sample_tasks;
use crate::task::{Execution, Task, TaskId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Failures a caller of the orchestrator can observe
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Task not found with id: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] RejectionReason),

    #[error("Task {0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    Storage(#[from] taskpod_foundation::Error),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

// ============================================================================
// Per-task locks
// ============================================================================

type LockTable = std::sync::Mutex<HashMap<TaskId, Arc<Mutex<()>>>>;

/// Held lock on one task id
///
/// Dropping it releases the lock and removes the table entry once nobody
/// else holds or waits on it.
struct TaskLock<'a> {
    table: &'a LockTable,
    id: TaskId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TaskLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct TaskOrchestrator {
    repository: Arc<dyn TaskRepository>,
    policy: Arc<CommandPolicy>,
    sandbox: Arc<dyn Executor>,
    local: Arc<dyn Executor>,
    /// Per-task mutation locks
    locks: LockTable,
}

impl TaskOrchestrator {
    /// Create with the default command policy
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        sandbox: Arc<dyn Executor>,
        local: Arc<dyn Executor>,
    ) -> Self {
        Self::with_policy(repository, Arc::new(CommandPolicy::default()), sandbox, local)
    }

    pub fn with_policy(
        repository: Arc<dyn TaskRepository>,
        policy: Arc<CommandPolicy>,
        sandbox: Arc<dyn Executor>,
        local: Arc<dyn Executor>,
    ) -> Self {
        Self {
            repository,
            policy,
            sandbox,
            local,
            locks: LockTable::default(),
        }
    }

    /// Backend `execute` would use right now
    pub fn selected_executor(&self) -> &dyn Executor {
        if self.sandbox.is_available() {
            self.sandbox.as_ref()
        } else {
            self.local.as_ref()
        }
    }

    async fn lock_task(&self, id: &TaskId) -> TaskLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // entries left behind by cancelled waiters
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        TaskLock {
            table: &self.locks,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_all_tasks(&self) -> ServiceResult<Vec<Task>> {
        Ok(self.repository.find_all().await?)
    }

    pub async fn get_task(&self, id: &TaskId) -> ServiceResult<Option<Task>> {
        Ok(self.repository.find_by_id(id).await?)
    }

    pub async fn find_by_name(&self, name: &str) -> ServiceResult<Vec<Task>> {
        Ok(self.repository.find_by_name_contains(name).await?)
    }

    pub async fn find_by_owner(&self, owner: &str) -> ServiceResult<Vec<Task>> {
        Ok(self.repository.find_by_owner_contains(owner).await?)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create or replace a task after validating its command
    ///
    /// A blank id is replaced with a generated one. Nothing is written when
    /// a field is missing or the command is rejected.
    pub async fn save_task(&self, mut task: Task) -> ServiceResult<Task> {
        if task.name.trim().is_empty() {
            return Err(ServiceError::MissingField("name"));
        }
        if task.owner.trim().is_empty() {
            return Err(ServiceError::MissingField("owner"));
        }

        self.policy.validate(&task.command).map_err(|reason| {
            warn!("Rejected command for task '{}': {}", task.name, reason);
            ServiceError::InvalidCommand(reason)
        })?;

        if task.id.is_blank() {
            task.id = TaskId::new();
        }

        let _lock = self.lock_task(&task.id).await;

        let saved = self.repository.save(task).await?;
        debug!("Saved task {}", saved.id);
        Ok(saved)
    }

    pub async fn delete_task(&self, id: &TaskId) -> ServiceResult<()> {
        if !self.repository.exists_by_id(id).await? {
            return Err(ServiceError::TaskNotFound(id.clone()));
        }

        let _lock = self.lock_task(id).await;
        if !self.repository.exists_by_id(id).await? {
            return Err(ServiceError::TaskNotFound(id.clone()));
        }
        self.repository.delete_by_id(id).await?;
        info!("Deleted task {}", id);
        Ok(())
    }

    /// Run a stored task's command and append the result to its history
    ///
    /// Only a missing task or a storage failure is an error; a failed run is
    /// returned as an execution with an `Error: ` output.
    pub async fn execute(&self, id: &TaskId) -> ServiceResult<Execution> {
        if !self.repository.exists_by_id(id).await? {
            return Err(ServiceError::TaskNotFound(id.clone()));
        }

        let _lock = self.lock_task(id).await;
        // may have been deleted while waiting for the lock
        let mut task = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::TaskNotFound(id.clone()))?;

        let executor = self.selected_executor();
        info!("Executing task {} via {}", task.id, executor.name());

        let start_time = Utc::now();
        let output = match executor.run(&task.command).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Execution of task {} failed: {}", task.id, e);
                format!("Error: {}", e)
            }
        };
        let execution = Execution::new(start_time, Utc::now(), output);

        task.record(execution.clone());
        self.repository.save(task).await?;

        debug!(
            "Task {} finished in {}ms",
            id,
            execution.duration().as_millis()
        );
        Ok(execution)
    }

    /// Insert the sample tasks when the store is empty
    ///
    /// Returns how many were inserted.
    pub async fn seed_samples(&self) -> ServiceResult<usize> {
        let existing = self.repository.count().await?;
        if existing > 0 {
            info!("Store already holds {} tasks, skipping sample data", existing);
            return Ok(0);
        }

        let samples = sample_tasks();
        let count = samples.len();
        for task in samples {
            self.repository.save(task).await?;
        }
        info!("Loaded {} sample tasks", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionError;
    use crate::repository::MemoryTaskRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use taskpod_foundation::Result;

    /// Executor returning a fixed result and counting calls
    struct FakeExecutor {
        available: bool,
        result: std::result::Result<String, ExecutionError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeExecutor {
        fn ok(output: &str) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                result: Ok(output.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: ExecutionError) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                result: Err(err),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable() -> Arc<Self> {
            Arc::new(Self {
                available: false,
                result: Err(ExecutionError::Unavailable("disabled".into())),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn run(&self, _command: &str) -> std::result::Result<String, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// Repository wrapper counting saves
    struct CountingRepository {
        inner: MemoryTaskRepository,
        saves: AtomicUsize,
    }

    impl CountingRepository {
        fn new(tasks: Vec<Task>) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryTaskRepository::with_tasks(tasks),
                saves: AtomicUsize::new(0),
            })
        }

        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskRepository for CountingRepository {
        async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
            self.inner.find_by_id(id).await
        }
        async fn find_all(&self) -> Result<Vec<Task>> {
            self.inner.find_all().await
        }
        async fn find_by_name_contains(&self, needle: &str) -> Result<Vec<Task>> {
            self.inner.find_by_name_contains(needle).await
        }
        async fn find_by_owner_contains(&self, needle: &str) -> Result<Vec<Task>> {
            self.inner.find_by_owner_contains(needle).await
        }
        async fn exists_by_id(&self, id: &TaskId) -> Result<bool> {
            self.inner.exists_by_id(id).await
        }
        async fn save(&self, task: Task) -> Result<Task> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(task).await
        }
        async fn delete_by_id(&self, id: &TaskId) -> Result<()> {
            self.inner.delete_by_id(id).await
        }
        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }
    }

    fn deploy_task() -> Task {
        Task::new("Deploy", "John Doe", "echo Deploying application").with_id("1")
    }

    #[tokio::test]
    async fn test_execute_unknown_task() {
        let repo = CountingRepository::new(vec![]);
        let local = FakeExecutor::ok("x");
        let orchestrator =
            TaskOrchestrator::new(repo.clone(), FakeExecutor::unavailable(), local.clone());

        let err = orchestrator.execute(&TaskId::from("missing")).await.unwrap_err();
        assert!(matches!(err, ServiceError::TaskNotFound(ref id) if id.as_str() == "missing"));
        assert_eq!(err.to_string(), "Task not found with id: missing");
        assert_eq!(repo.saves(), 0);
        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn test_execute_records_one_execution() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let orchestrator = TaskOrchestrator::new(
            repo.clone(),
            FakeExecutor::unavailable(),
            FakeExecutor::ok("Deploying application\n"),
        );

        let execution = orchestrator.execute(&TaskId::from("1")).await.unwrap();
        assert_eq!(execution.output, "Deploying application\n");
        assert!(execution.end_time >= execution.start_time);
        assert_eq!(repo.saves(), 1);

        let stored = repo.find_by_id(&TaskId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.executions.len(), 1);
        assert_eq!(stored.last_execution(), Some(&execution));
    }

    #[tokio::test]
    async fn test_sandbox_preferred_when_available() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let sandbox = FakeExecutor::ok("from pod\n");
        let local = FakeExecutor::ok("from host\n");
        let orchestrator = TaskOrchestrator::new(repo, sandbox.clone(), local.clone());

        let execution = orchestrator.execute(&TaskId::from("1")).await.unwrap();
        assert_eq!(execution.output, "from pod\n");
        assert_eq!(sandbox.calls(), 1);
        assert_eq!(local.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_sandbox_never_invoked() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let sandbox = FakeExecutor::unavailable();
        let local = FakeExecutor::ok("from host\n");
        let orchestrator = TaskOrchestrator::new(repo, sandbox.clone(), local.clone());

        orchestrator.execute(&TaskId::from("1")).await.unwrap();
        assert_eq!(sandbox.calls(), 0);
        assert_eq!(local.calls(), 1);
        assert_eq!(orchestrator.selected_executor().name(), "fake");
    }

    #[tokio::test]
    async fn test_failure_recorded_as_output() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let sandbox = FakeExecutor::failing(ExecutionError::Timeout(
            "pod task-execution-1 did not finish within 60s".into(),
        ));
        let orchestrator = TaskOrchestrator::new(repo.clone(), sandbox, FakeExecutor::ok(""));

        let execution = orchestrator.execute(&TaskId::from("1")).await.unwrap();
        assert_eq!(
            execution.output,
            "Error: Execution timeout: pod task-execution-1 did not finish within 60s"
        );
        assert_eq!(repo.saves(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_executions_keep_every_record() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let local = Arc::new(FakeExecutor {
            available: true,
            result: Ok("ok\n".into()),
            delay: Duration::from_millis(20),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(TaskOrchestrator::new(
            repo.clone(),
            FakeExecutor::unavailable(),
            local,
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orchestrator.execute(&TaskId::from("1")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = repo.find_by_id(&TaskId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.executions.len(), 5);
    }

    #[tokio::test]
    async fn test_save_rejections_write_nothing() {
        let repo = CountingRepository::new(vec![]);
        let orchestrator = TaskOrchestrator::new(
            repo.clone(),
            FakeExecutor::unavailable(),
            FakeExecutor::ok(""),
        );

        let err = orchestrator
            .save_task(Task::new("Wipe", "Mallory", "rm -rf /"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidCommand(RejectionReason::DangerousOperation(ref t)) if t == "rm"
        ));

        let err = orchestrator
            .save_task(Task::new("Chain", "Mallory", "echo hi; echo bye"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidCommand(RejectionReason::InjectionCharacters)
        ));

        let err = orchestrator
            .save_task(Task::new(" ", "Mallory", "echo hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::MissingField("name")));

        let err = orchestrator
            .save_task(Task::new("Empty", "Mallory", "   "))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidCommand(RejectionReason::EmptyCommand)
        ));

        assert_eq!(repo.saves(), 0);
    }

    #[tokio::test]
    async fn test_save_assigns_id_when_blank() {
        let repo = CountingRepository::new(vec![]);
        let orchestrator =
            TaskOrchestrator::new(repo.clone(), FakeExecutor::unavailable(), FakeExecutor::ok(""));

        let saved = orchestrator
            .save_task(Task::new("Run Tests", "Jane Smith", "echo Running tests").with_id(""))
            .await
            .unwrap();
        assert!(!saved.id.is_blank());
        assert_eq!(repo.saves(), 1);
        assert!(orchestrator.get_task(&saved.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_and_search() {
        let repo = CountingRepository::new(vec![]);
        let orchestrator =
            TaskOrchestrator::new(repo, FakeExecutor::unavailable(), FakeExecutor::ok(""));
        assert_eq!(orchestrator.seed_samples().await.unwrap(), 5);

        assert_eq!(orchestrator.find_by_name("deploy").await.unwrap().len(), 2);
        assert_eq!(orchestrator.find_by_owner("john doe").await.unwrap().len(), 2);

        orchestrator.delete_task(&TaskId::from("3")).await.unwrap();
        assert_eq!(orchestrator.get_all_tasks().await.unwrap().len(), 4);

        let err = orchestrator.delete_task(&TaskId::from("3")).await.unwrap_err();
        assert!(matches!(err, ServiceError::TaskNotFound(_)));
        assert_eq!(orchestrator.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_leave_no_lock_entries() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let orchestrator =
            TaskOrchestrator::new(repo, FakeExecutor::unavailable(), FakeExecutor::ok("ok\n"));

        for i in 0..100 {
            let id = TaskId::from(format!("missing-{}", i));
            assert!(orchestrator.execute(&id).await.is_err());
        }
        assert_eq!(orchestrator.lock_entries(), 0);

        orchestrator.execute(&TaskId::from("1")).await.unwrap();
        assert_eq!(orchestrator.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_execute_after_delete_is_not_found() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let local = FakeExecutor::ok("ok\n");
        let orchestrator =
            Arc::new(TaskOrchestrator::new(repo.clone(), FakeExecutor::unavailable(), local.clone()));

        let id = TaskId::from("1");
        let (deleted, executed) =
            tokio::join!(orchestrator.delete_task(&id), orchestrator.execute(&id));
        deleted.unwrap();

        // whichever ran second, the task must not come back
        match executed {
            Ok(_) => assert_eq!(local.calls(), 1),
            Err(e) => assert!(matches!(e, ServiceError::TaskNotFound(_))),
        }
        assert!(repo.find_by_id(&id).await.unwrap().is_none());
        assert!(matches!(
            orchestrator.execute(&id).await,
            Err(ServiceError::TaskNotFound(_))
        ));
        assert_eq!(orchestrator.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_lock_entries_pruned_after_concurrent_runs() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let local = Arc::new(FakeExecutor {
            available: true,
            result: Ok("ok\n".into()),
            delay: Duration::from_millis(10),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(TaskOrchestrator::new(
            repo,
            FakeExecutor::unavailable(),
            local,
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.execute(&TaskId::from("1")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(orchestrator.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_seed_skips_non_empty_store() {
        let repo = CountingRepository::new(vec![deploy_task()]);
        let orchestrator =
            TaskOrchestrator::new(repo.clone(), FakeExecutor::unavailable(), FakeExecutor::ok(""));
        assert_eq!(orchestrator.seed_samples().await.unwrap(), 0);
        assert_eq!(repo.saves(), 0);
    }
}
