//! Execution errors
//!
//! These never reach a caller of the orchestrator: they are recorded as the
//! output of a completed execution.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Backend cannot run commands (disabled or failed to connect)
    #[error("Sandbox execution is unavailable: {0}")]
    Unavailable(String),

    /// No result before the deadline
    #[error("Execution timeout: {0}")]
    Timeout(String),

    /// Cluster API failure while creating or polling the pod
    #[error("Failed to execute in sandbox: {0}")]
    Cluster(String),

    /// Spawning, reading or waiting on a local process failed
    #[error("Failed to run command: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        ExecutionError::Io(e.to_string())
    }
}
