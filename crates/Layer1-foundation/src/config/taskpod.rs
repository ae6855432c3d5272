//! taskpod config - file + environment settings
//!
//! Global and project `config.json` files are merged (project wins), then
//! environment variables are applied on top.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Config file name
pub const TASKPOD_CONFIG_FILE: &str = "config.json";

/// Enables sandboxed execution when set to `true` (case-insensitive)
pub const ENV_ENABLE_SANDBOX: &str = "ENABLE_K8S";
/// Namespace sandbox pods are created in
pub const ENV_SANDBOX_NAMESPACE: &str = "KUBERNETES_NAMESPACE";
/// Overrides the task store directory
pub const ENV_DATA_DIR: &str = "TASKPOD_DATA_DIR";

// ============================================================================
// taskpod Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskpodConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl TaskpodConfig {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    /// Global + project files, then environment overrides
    pub fn load() -> Result<Self> {
        let mut stores = Vec::new();
        if let Ok(global) = JsonStore::global() {
            stores.push(global);
        }
        if let Ok(project) = JsonStore::current_project() {
            stores.push(project);
        }

        let mut config = Self::from_files(&stores)?;
        config.apply_env();
        Ok(config)
    }

    /// Load a single config file, then environment overrides
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        let mut config = Self::from_files(std::slice::from_ref(store))?;
        config.apply_env();
        Ok(config)
    }

    /// Merge the config files found in `stores`, later stores winning
    ///
    /// Keys a file leaves out keep the value from earlier files.
    pub fn from_files(stores: &[JsonStore]) -> Result<Self> {
        let mut config = Self::new();
        for store in stores {
            if let Some(file_config) = store.load_optional::<TaskpodConfig>(TASKPOD_CONFIG_FILE)? {
                config.merge(file_config);
            }
        }
        Ok(config)
    }

    /// Merge another config (other wins)
    pub fn merge(&mut self, other: TaskpodConfig) {
        self.sandbox.merge(other.sandbox);
        self.storage.merge(other.storage);
    }

    /// Apply process environment overrides
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(flag) = lookup(ENV_ENABLE_SANDBOX) {
            self.sandbox.enabled = Some(flag.trim().eq_ignore_ascii_case("true"));
        }
        if let Some(namespace) = lookup(ENV_SANDBOX_NAMESPACE) {
            let namespace = namespace.trim();
            if !namespace.is_empty() {
                self.sandbox.namespace = namespace.to_string();
            }
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.storage.data_dir = Some(PathBuf::from(dir.trim()));
            }
        }
    }

    /// Store holding the task document
    pub fn data_store(&self) -> Result<JsonStore> {
        match &self.storage.data_dir {
            Some(dir) => Ok(JsonStore::new(dir.clone())),
            None => JsonStore::data(),
        }
    }
}

// ============================================================================
// Sandbox Settings
// ============================================================================

/// Settings for pod-based sandboxed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSettings {
    /// Off unless explicitly enabled; `None` means the file left it unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Image the command runs in; must provide `sh`
    #[serde(default = "default_image")]
    pub image: String,

    /// How long a pod may take to reach a terminal phase
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,

    /// API server URL; in-cluster service discovery when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<String>,

    /// Kubeconfig consulted when `apiServer` is unset; `$KUBECONFIG` or
    /// `~/.kube/config` otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// Bearer token file; the service account token when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,

    /// CA bundle for the API server; the service account CA when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            namespace: default_namespace(),
            image: default_image(),
            timeout_secs: default_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            api_server: None,
            kubeconfig: None,
            token_file: None,
            ca_file: None,
        }
    }
}

impl SandboxSettings {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn api_server(mut self, url: impl Into<String>) -> Self {
        self.api_server = Some(url.into());
        self
    }

    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis.max(1))
    }

    fn merge(&mut self, other: SandboxSettings) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.namespace != default_namespace() {
            self.namespace = other.namespace;
        }
        if other.image != default_image() {
            self.image = other.image;
        }
        if other.timeout_secs != default_timeout_secs() {
            self.timeout_secs = other.timeout_secs;
        }
        if other.poll_interval_millis != default_poll_interval_millis() {
            self.poll_interval_millis = other.poll_interval_millis;
        }
        if other.api_server.is_some() {
            self.api_server = other.api_server;
        }
        if other.kubeconfig.is_some() {
            self.kubeconfig = other.kubeconfig;
        }
        if other.token_file.is_some() {
            self.token_file = other.token_file;
        }
        if other.ca_file.is_some() {
            self.ca_file = other.ca_file;
        }
    }
}

// ============================================================================
// Storage Settings
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Directory holding `tasks.json`; platform data dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    fn merge(&mut self, other: StorageSettings) {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_version() -> u32 {
    1
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_image() -> String {
    "busybox:latest".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_millis() -> u64 {
    1000
}
