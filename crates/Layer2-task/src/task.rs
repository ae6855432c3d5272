//! Task definition and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
///
/// Callers may choose their own ids; [`TaskId::new`] assigns a random one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when no usable id was supplied
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named, owned command plus its execution history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,

    pub name: String,

    pub owner: String,

    /// Raw shell text
    pub command: String,

    /// Oldest first
    #[serde(default, rename = "taskExecutions")]
    pub executions: Vec<Execution>,
}

impl Task {
    /// Create a new task with a random id
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            owner: owner.into(),
            command: command.into(),
            executions: Vec::new(),
        }
    }

    /// Set a caller-chosen id
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Append an execution to the history
    pub fn record(&mut self, execution: Execution) {
        self.executions.push(execution);
    }

    pub fn last_execution(&self) -> Option<&Execution> {
        self.executions.last()
    }

    /// Case-insensitive substring match on the name
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Case-insensitive substring match on the owner
    pub fn owner_contains(&self, needle: &str) -> bool {
        self.owner.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// One timestamped run attempt and its captured output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    /// Program output, or an `Error: ...` description when the run failed
    pub output: String,
}

impl Execution {
    /// Build a completed execution; `end_time` is never earlier than `start_time`
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>, output: impl Into<String>) -> Self {
        Self {
            start_time,
            end_time: end_time.max(start_time),
            output: output.into(),
        }
    }

    /// Wall-clock duration of the run
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time).to_std().unwrap_or_default()
    }
}
