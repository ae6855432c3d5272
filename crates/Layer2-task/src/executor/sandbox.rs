//! Sandbox executor - runs each command in a single-use pod
//!
//! Lifecycle per run: `Created -> Running -> (Succeeded | Failed | TimedOut) -> CleanedUp`.
//!
//! The backend is decided once at construction. A disabled flag or any
//! failure to reach the cluster leaves the executor [`SandboxBackend::Disabled`]
//! for the life of the process and every run fails with `Unavailable`.
//!
//! Cleanup is owned by a [`PodGuard`]: the pod is deleted exactly once per
//! run, whether the run returns output, returns an error, or the future is
//! dropped mid-poll.

use crate::executor::cluster::{ClusterClient, KubeApiClient, PodManifest};
use crate::executor::{ExecutionError, Executor};
use crate::state::SandboxState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use taskpod_foundation::SandboxSettings;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Prefix of every generated pod name
pub const POD_NAME_PREFIX: &str = "task-execution";

static POD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique pod name: wall-clock millis plus a process-wide counter
pub fn generate_pod_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = POD_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", POD_NAME_PREFIX, millis, seq)
}

/// Whether the sandbox can run anything
#[derive(Clone)]
pub enum SandboxBackend {
    Disabled {
        reason: String,
    },
    Ready {
        client: Arc<dyn ClusterClient>,
        namespace: String,
    },
}

impl std::fmt::Debug for SandboxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxBackend::Disabled { reason } => {
                f.debug_struct("Disabled").field("reason", reason).finish()
            }
            SandboxBackend::Ready { namespace, .. } => {
                f.debug_struct("Ready").field("namespace", namespace).finish()
            }
        }
    }
}

/// Executor that runs commands in ephemeral cluster pods
#[derive(Debug)]
pub struct SandboxExecutor {
    backend: SandboxBackend,
    image: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl SandboxExecutor {
    /// Build from settings, probing the cluster when enabled
    ///
    /// Never fails: an unreachable cluster or missing credentials yield a
    /// disabled executor.
    pub async fn connect(settings: &SandboxSettings) -> Self {
        if !settings.is_enabled() {
            info!("Sandbox execution disabled");
            return Self::disabled(settings, "sandbox execution is disabled");
        }

        let client = match KubeApiClient::from_settings(settings) {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to initialize cluster client: {}", e);
                return Self::disabled(settings, e.to_string());
            }
        };

        if let Err(e) = client.probe().await {
            warn!("Cluster at {} is unreachable: {}", client.base_url(), e);
            return Self::disabled(settings, e.to_string());
        }

        info!(
            "Sandbox execution ready (namespace: {}, api: {})",
            settings.namespace,
            client.base_url()
        );
        Self::with_client(Arc::new(client), settings)
    }

    /// Ready executor over an existing client
    pub fn with_client(client: Arc<dyn ClusterClient>, settings: &SandboxSettings) -> Self {
        Self::from_backend(
            SandboxBackend::Ready {
                client,
                namespace: settings.namespace.clone(),
            },
            settings,
        )
    }

    pub fn disabled(settings: &SandboxSettings, reason: impl Into<String>) -> Self {
        Self::from_backend(
            SandboxBackend::Disabled {
                reason: reason.into(),
            },
            settings,
        )
    }

    fn from_backend(backend: SandboxBackend, settings: &SandboxSettings) -> Self {
        Self {
            backend,
            image: settings.image.clone(),
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
        }
    }

    pub fn backend(&self) -> &SandboxBackend {
        &self.backend
    }

    fn timeout_error(&self, name: &str) -> ExecutionError {
        ExecutionError::Timeout(format!(
            "pod {} did not finish within {}s",
            name,
            self.timeout.as_secs()
        ))
    }

    /// Poll until a terminal phase or the deadline
    ///
    /// Each status request only gets the time left before the deadline.
    async fn wait_for_completion(
        &self,
        client: &dyn ClusterClient,
        namespace: &str,
        name: &str,
    ) -> Result<SandboxState, ExecutionError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let phase = tokio::time::timeout(remaining, client.pod_phase(namespace, name))
                .await
                .map_err(|_| self.timeout_error(name))?
                .map_err(|e| {
                    error!("Error checking pod status: {}", e);
                    ExecutionError::Cluster(e.to_string())
                })?;

            let state = SandboxState::from_phase(phase);
            if state.is_terminal() {
                return Ok(state);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(name));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Best-effort log retrieval
    async fn collect_logs(client: &dyn ClusterClient, namespace: &str, name: &str) -> String {
        match client.pod_logs(namespace, name).await {
            Ok(logs) => logs,
            Err(e) => {
                error!("Error getting pod logs: {}", e);
                format!("Error retrieving logs: {}", e)
            }
        }
    }

    async fn run_in_pod(
        &self,
        client: &dyn ClusterClient,
        namespace: &str,
        name: &str,
        command: &str,
    ) -> Result<String, ExecutionError> {
        let manifest = PodManifest::single_command(name, self.image.as_str(), command);
        client.create_pod(namespace, &manifest).await.map_err(|e| {
            if let Some(body) = e.response_body() {
                error!("Cluster API error: {}", body);
            }
            ExecutionError::Cluster(e.to_string())
        })?;
        debug!("Pod {} is {}", name, SandboxState::Created);

        match self.wait_for_completion(client, namespace, name).await {
            Ok(state) => {
                debug!("Pod {} is {}", name, state);
                Ok(Self::collect_logs(client, namespace, name).await)
            }
            Err(e @ ExecutionError::Timeout(_)) => {
                warn!("Pod {} is {}", name, SandboxState::TimedOut);
                let partial = Self::collect_logs(client, namespace, name).await;
                debug!("Partial output of {}: {:?}", name, partial);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    async fn run(&self, command: &str) -> Result<String, ExecutionError> {
        let (client, namespace) = match &self.backend {
            SandboxBackend::Disabled { reason } => {
                return Err(ExecutionError::Unavailable(reason.clone()))
            }
            SandboxBackend::Ready { client, namespace } => (client, namespace),
        };

        let name = generate_pod_name();
        let guard = PodGuard::new(client.clone(), namespace.clone(), name.clone());

        let result = self
            .run_in_pod(client.as_ref(), namespace, &name, command)
            .await;

        guard.cleanup().await;
        result
    }

    fn is_available(&self) -> bool {
        matches!(self.backend, SandboxBackend::Ready { .. })
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}

/// Deletes its pod exactly once
///
/// [`PodGuard::cleanup`] deletes inline; if the guard is dropped without it
/// (the run future was cancelled), deletion is spawned onto the runtime.
struct PodGuard {
    client: Arc<dyn ClusterClient>,
    namespace: String,
    name: String,
    armed: bool,
}

impl PodGuard {
    fn new(client: Arc<dyn ClusterClient>, namespace: String, name: String) -> Self {
        Self {
            client,
            namespace,
            name,
            armed: true,
        }
    }

    async fn cleanup(mut self) {
        self.armed = false;
        delete_pod(self.client.as_ref(), &self.namespace, &self.name).await;
    }
}

impl Drop for PodGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let namespace = std::mem::take(&mut self.namespace);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    delete_pod(client.as_ref(), &namespace, &name).await;
                });
            }
            Err(_) => error!("No runtime to delete abandoned pod {}", name),
        }
    }
}

async fn delete_pod(client: &dyn ClusterClient, namespace: &str, name: &str) {
    match client.delete_pod(namespace, name).await {
        Ok(()) => debug!("Pod {} is {}", name, SandboxState::CleanedUp),
        // never created, or already gone
        Err(e) if e.is_not_found() => debug!("Pod {} already absent: {}", name, e),
        Err(e) => error!("Error deleting pod {}: {}", name, e),
    }
}
