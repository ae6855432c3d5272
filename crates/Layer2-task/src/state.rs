//! Sandbox pod state machine

use serde::{Deserialize, Serialize};

/// Pod phase as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the `status.phase` string; anything unrecognised is `Unknown`
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// The pod has finished and will not run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Lifecycle of one sandboxed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxState {
    /// Pod accepted by the API server
    Created,

    /// Waiting for a terminal phase
    Running,

    /// Container exited zero
    Succeeded,

    /// Container exited non-zero
    Failed,

    /// No terminal phase before the deadline
    TimedOut,

    /// Pod deleted (or deletion attempted)
    CleanedUp,
}

impl SandboxState {
    /// Outcome reached; only cleanup remains
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SandboxState::Succeeded | SandboxState::Failed | SandboxState::TimedOut
        )
    }

    /// State reached after observing a pod phase
    pub fn from_phase(phase: PodPhase) -> Self {
        match phase {
            PodPhase::Succeeded => SandboxState::Succeeded,
            PodPhase::Failed => SandboxState::Failed,
            _ => SandboxState::Running,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SandboxState::Created => "Created",
            SandboxState::Running => "Running",
            SandboxState::Succeeded => "Succeeded",
            SandboxState::Failed => "Failed",
            SandboxState::TimedOut => "TimedOut",
            SandboxState::CleanedUp => "CleanedUp",
        }
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
