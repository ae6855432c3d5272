//! # taskpod-task
//!
//! Task registry and execution for taskpod.
//! Validates commands on save, runs them on the host or in a single-use
//! cluster pod, and records every run in the task's history.
//!
//! ## Features
//!
//! - Command policy (denylist, shell metacharacters, encoded payloads)
//! - Two execution backends (Local, Sandbox pod) behind one `Executor` trait
//! - Graceful degradation when the cluster is unreachable
//! - Pod cleanup on every exit path, including cancellation
//! - Per-task serialization of history updates
//! - **Memory and JSON-file task repositories**

pub mod executor;
pub mod orchestrator;
pub mod repository;
pub mod sample;
pub mod state;
pub mod task;

// Execution
pub use executor::{
    ClusterClient, ClusterError, CommandPolicy, ExecutionError, Executor, KubeApiClient,
    LocalExecutor, LocalExecutorConfig, PodManifest, RejectionReason, SandboxBackend,
    SandboxExecutor, DEFAULT_DENYLIST,
};
pub use state::{PodPhase, SandboxState};
pub use task::{Execution, Task, TaskId};

// Orchestration
pub use orchestrator::{ServiceError, ServiceResult, TaskOrchestrator};

// Persistence
pub use repository::{JsonTaskRepository, MemoryTaskRepository, TaskRepository, TASKS_FILE};
pub use sample::sample_tasks;
