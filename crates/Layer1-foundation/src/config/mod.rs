//! Config - taskpod settings
//!
//! - `taskpod.rs` - TaskpodConfig (sandbox + storage settings)

mod taskpod;

pub use taskpod::{
    SandboxSettings, StorageSettings, TaskpodConfig, ENV_DATA_DIR, ENV_ENABLE_SANDBOX,
    ENV_SANDBOX_NAMESPACE, TASKPOD_CONFIG_FILE,
};
