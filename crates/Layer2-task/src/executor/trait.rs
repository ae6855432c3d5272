//! Executor trait

use crate::executor::ExecutionError;
use async_trait::async_trait;

/// Executor trait - implement to add new execution backends
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command to completion and return its captured output
    async fn run(&self, command: &str) -> Result<String, ExecutionError>;

    /// Check if the executor can currently run commands
    fn is_available(&self) -> bool;

    /// Get executor name
    fn name(&self) -> &'static str;
}
