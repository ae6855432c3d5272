//! # taskpod-foundation
//!
//! Foundation layer for taskpod:
//! - Error: shared `Error` / `Result`
//! - Config: TaskpodConfig (sandbox + storage settings, env overrides)
//! - Storage: JsonStore (file-backed JSON documents)
//! - Environment: host OS and shell detection

pub mod config;
pub mod env_detect;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    SandboxSettings, StorageSettings, TaskpodConfig, ENV_DATA_DIR, ENV_ENABLE_SANDBOX,
    ENV_SANDBOX_NAMESPACE, TASKPOD_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, APP_DIR};

// ============================================================================
// Environment Detection
// ============================================================================
pub use env_detect::{OsType, ShellKind};
