//! Cluster client - pod operations against a Kubernetes API server
//!
//! The sandbox executor only needs four calls, each scoped to a namespace and
//! a pod name: create, read phase, read logs, delete. [`ClusterClient`] is that
//! seam; [`KubeApiClient`] implements it over the core/v1 REST API with
//! `reqwest`, authenticating with a bearer token.
//!
//! Credentials are resolved in order: an explicit `apiServer` in the sandbox
//! settings, a kubeconfig (`kubeconfig` setting, `$KUBECONFIG`, then
//! `~/.kube/config`), and finally the in-cluster service account
//! (`KUBERNETES_SERVICE_HOST` / `_PORT` plus the mounted token and CA bundle).

use super::kubeconfig::{self, Kubeconfig};
use crate::state::PodPhase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskpod_foundation::SandboxSettings;
use thiserror::Error;
use tracing::{debug, info};

/// Mounted service account credentials inside a pod
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Label put on every sandbox pod
pub const SANDBOX_LABEL: (&str, &str) = ("app", "task-execution");

/// Name of the single container in a sandbox pod
pub const SANDBOX_CONTAINER: &str = "task-container";

/// Per-request HTTP timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The API server answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        body: String,
    },

    /// The request never got an answer
    #[error("HTTP error: {0}")]
    Http(String),

    /// Client could not be configured
    #[error("Cluster configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    /// Raw response body for API errors
    pub fn response_body(&self) -> Option<&str> {
        match self {
            ClusterError::Api { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The API server reported the object missing (HTTP 404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Api { status: 404, .. })
    }

    /// Build an API error, preferring the `message` of a Kubernetes `Status` body
    pub fn from_response(status: u16, body: String) -> Self {
        let message = serde_json::from_str::<StatusBody>(&body)
            .ok()
            .and_then(|s| s.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("HTTP status {}", status)
                } else {
                    body.trim().to_string()
                }
            });
        ClusterError::Api {
            status,
            message,
            body,
        }
    }
}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        ClusterError::Http(e.to_string())
    }
}

#[derive(Deserialize)]
struct StatusBody {
    message: Option<String>,
}

// ============================================================================
// Client trait
// ============================================================================

/// Pod operations the sandbox executor depends on
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_pod(&self, namespace: &str, pod: &PodManifest) -> Result<(), ClusterError>;

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<PodPhase, ClusterError>;

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}

// ============================================================================
// Pod manifest
// ============================================================================

/// Minimal `v1/Pod` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub restart_policy: String,
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
}

impl PodManifest {
    /// One container running `sh -c <command>`, never restarted
    pub fn single_command(name: impl Into<String>, image: impl Into<String>, command: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(SANDBOX_LABEL.0.to_string(), SANDBOX_LABEL.1.to_string());

        Self {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: name.into(),
                labels,
            },
            spec: PodSpec {
                restart_policy: "Never".to_string(),
                containers: vec![ContainerSpec {
                    name: SANDBOX_CONTAINER.to_string(),
                    image: image.into(),
                    command: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
                }],
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Deserialize)]
struct PodResponse {
    #[serde(default)]
    status: Option<PodStatusBody>,
}

#[derive(Deserialize)]
struct PodStatusBody {
    #[serde(default)]
    phase: Option<String>,
}

// ============================================================================
// REST client
// ============================================================================

/// Where and how to reach the API server
#[derive(Clone, Default)]
pub struct ClusterCredentials {
    pub server: String,
    pub token: Option<String>,
    /// Extra CA to trust (PEM)
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate followed by its private key (PEM)
    pub identity_pem: Option<Vec<u8>>,
    /// Skip server certificate verification
    pub insecure: bool,
}

impl std::fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("server", &self.server)
            .field("token", &self.token.is_some())
            .field("ca", &self.ca_pem.is_some())
            .field("identity", &self.identity_pem.is_some())
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Kubernetes core/v1 client over HTTPS
pub struct KubeApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for KubeApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl KubeApiClient {
    /// Create a client for `base_url`, optionally trusting an extra CA (PEM)
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        ca_pem: Option<&[u8]>,
    ) -> Result<Self, ClusterError> {
        Self::with_credentials(ClusterCredentials {
            server: base_url.into(),
            token,
            ca_pem: ca_pem.map(<[u8]>::to_vec),
            ..ClusterCredentials::default()
        })
    }

    pub fn with_credentials(credentials: ClusterCredentials) -> Result<Self, ClusterError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(pem) = &credentials.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("Invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &credentials.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("Invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
        if credentials.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ClusterError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: credentials.server.trim_end_matches('/').to_string(),
            token: credentials.token,
        })
    }

    /// Build from sandbox settings and the process environment
    pub fn from_settings(settings: &SandboxSettings) -> Result<Self, ClusterError> {
        Self::from_settings_with(settings, |key| std::env::var(key).ok(), dirs::home_dir())
    }

    /// Build from sandbox settings, an environment source, and a home directory
    pub fn from_settings_with<F>(
        settings: &SandboxSettings,
        lookup: F,
        home: Option<PathBuf>,
    ) -> Result<Self, ClusterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = resolve_credentials(settings, lookup, home.as_deref())?;
        debug!("Cluster API server: {}", credentials.server);
        Self::with_credentials(credentials)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check the API server answers (`GET /version`)
    pub async fn probe(&self) -> Result<(), ClusterError> {
        let url = format!("{}/version", self.base_url);
        self.send(self.client.get(url)).await?;
        Ok(())
    }

    fn pods_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace)
    }

    fn pod_url(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.pods_url(namespace), name)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ClusterError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClusterError::from_response(status.as_u16(), body))
        }
    }
}

#[async_trait]
impl ClusterClient for KubeApiClient {
    async fn create_pod(&self, namespace: &str, pod: &PodManifest) -> Result<(), ClusterError> {
        self.send(self.client.post(self.pods_url(namespace)).json(pod))
            .await?;
        info!("Created pod: {}", pod.name());
        Ok(())
    }

    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<PodPhase, ClusterError> {
        let response = self.send(self.client.get(self.pod_url(namespace, name))).await?;
        let pod: PodResponse = response.json().await?;
        Ok(pod
            .status
            .and_then(|s| s.phase)
            .map(|p| PodPhase::parse(&p))
            .unwrap_or(PodPhase::Pending))
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let url = format!("{}/log", self.pod_url(namespace, name));
        let response = self.send(self.client.get(url)).await?;
        Ok(response.text().await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.send(self.client.delete(self.pod_url(namespace, name)))
            .await?;
        info!("Deleted pod: {}", name);
        Ok(())
    }
}

fn resolve_credentials<F>(
    settings: &SandboxSettings,
    lookup: F,
    home: Option<&Path>,
) -> Result<ClusterCredentials, ClusterError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = &settings.api_server {
        return service_account_credentials(url.clone(), settings);
    }

    if let Some(path) = kubeconfig::locate(settings.kubeconfig.as_deref(), &lookup, home) {
        debug!("Using kubeconfig {}", path.display());
        let mut credentials = Kubeconfig::read(&path)?.credentials()?;
        if let Some(path) = &settings.token_file {
            credentials.token = Some(read_token(path)?);
        }
        if let Some(path) = &settings.ca_file {
            credentials.ca_pem = Some(read_ca(path)?);
        }
        return Ok(credentials);
    }

    service_account_credentials(in_cluster_url_with(&lookup)?, settings)
}

/// Token and CA from the settings, else from the mounted service account
fn service_account_credentials(
    server: String,
    settings: &SandboxSettings,
) -> Result<ClusterCredentials, ClusterError> {
    let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
    let token_path = settings
        .token_file
        .clone()
        .or_else(|| existing(sa_dir.join("token")));
    let ca_path = settings
        .ca_file
        .clone()
        .or_else(|| existing(sa_dir.join("ca.crt")));

    Ok(ClusterCredentials {
        server,
        token: token_path.as_deref().map(read_token).transpose()?,
        ca_pem: ca_path.as_deref().map(read_ca).transpose()?,
        ..ClusterCredentials::default()
    })
}

fn read_token(path: &Path) -> Result<String, ClusterError> {
    std::fs::read_to_string(path)
        .map(|t| t.trim().to_string())
        .map_err(|e| ClusterError::Config(format!("Failed to read token {}: {}", path.display(), e)))
}

fn read_ca(path: &Path) -> Result<Vec<u8>, ClusterError> {
    std::fs::read(path)
        .map_err(|e| ClusterError::Config(format!("Failed to read CA {}: {}", path.display(), e)))
}

/// API server URL from the in-cluster service environment
pub fn in_cluster_url_with<F>(lookup: F) -> Result<String, ClusterError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("KUBERNETES_SERVICE_HOST")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            ClusterError::Config(
                "KUBERNETES_SERVICE_HOST is not set and no apiServer is configured".to_string(),
            )
        })?;
    let port = lookup("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());

    if host.contains(':') {
        Ok(format!("https://[{}]:{}", host, port))
    } else {
        Ok(format!("https://{}:{}", host, port))
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_shape() {
        let pod = PodManifest::single_command("task-execution-1", "busybox:latest", "echo hi");
        let json = serde_json::to_value(&pod).unwrap();

        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Pod");
        assert_eq!(json["metadata"]["name"], "task-execution-1");
        assert_eq!(json["metadata"]["labels"]["app"], "task-execution");
        assert_eq!(json["spec"]["restartPolicy"], "Never");
        assert_eq!(json["spec"]["containers"][0]["name"], "task-container");
        assert_eq!(json["spec"]["containers"][0]["image"], "busybox:latest");
        assert_eq!(
            json["spec"]["containers"][0]["command"],
            serde_json::json!(["sh", "-c", "echo hi"])
        );
    }

    #[test]
    fn test_in_cluster_url() {
        let url = in_cluster_url_with(|key| match key {
            "KUBERNETES_SERVICE_HOST" => Some("10.0.0.1".into()),
            "KUBERNETES_SERVICE_PORT" => Some("6443".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(url, "https://10.0.0.1:6443");

        let v6 = in_cluster_url_with(|key| match key {
            "KUBERNETES_SERVICE_HOST" => Some("fd00::1".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(v6, "https://[fd00::1]:443");
    }

    #[test]
    fn test_in_cluster_url_missing_host() {
        let err = in_cluster_url_with(|_| None).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
    }

    #[test]
    fn test_error_from_status_body() {
        let body = r#"{"kind":"Status","message":"pods \"x\" not found","code":404}"#;
        let err = ClusterError::from_response(404, body.to_string());
        assert_eq!(err.to_string(), r#"API error (404): pods "x" not found"#);
        assert_eq!(err.response_body(), Some(body));

        let plain = ClusterError::from_response(500, String::new());
        assert_eq!(plain.to_string(), "API error (500): HTTP status 500");
    }

    #[test]
    fn test_from_settings_with_missing_token_file() {
        let settings = SandboxSettings {
            api_server: Some("https://127.0.0.1:6443".into()),
            token_file: Some(PathBuf::from("/nonexistent/taskpod/token")),
            ..SandboxSettings::default()
        };
        let err = KubeApiClient::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
    }

    #[test]
    fn test_not_found() {
        assert!(ClusterError::from_response(404, String::new()).is_not_found());
        assert!(!ClusterError::from_response(409, String::new()).is_not_found());
        assert!(!ClusterError::Http("reset".into()).is_not_found());
    }

    #[test]
    fn test_from_settings_reads_kubeconfig_env() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            r#"
current-context: local
clusters:
  - name: local
    cluster:
      server: http://127.0.0.1:8001/
contexts:
  - name: local
    context:
      cluster: local
      user: me
users:
  - name: me
    user:
      token: t0ken
"#,
        )
        .unwrap();
        let kubeconfig = path.to_string_lossy().into_owned();
        let lookup = |key: &str| (key == "KUBECONFIG").then(|| kubeconfig.clone());

        let client =
            KubeApiClient::from_settings_with(&SandboxSettings::default(), lookup, None).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8001");
        assert_eq!(client.token.as_deref(), Some("t0ken"));
    }

    #[test]
    fn test_from_settings_home_kubeconfig_before_in_cluster() {
        let home = tempdir().unwrap();
        std::fs::create_dir_all(home.path().join(".kube")).unwrap();
        std::fs::write(
            home.path().join(".kube").join("config"),
            "current-context: a\nclusters: [{name: a, cluster: {server: \"https://home:6443\"}}]\ncontexts: [{name: a, context: {cluster: a}}]\n",
        )
        .unwrap();
        let in_cluster = |key: &str| match key {
            "KUBERNETES_SERVICE_HOST" => Some("10.0.0.1".to_string()),
            _ => None,
        };

        let client = KubeApiClient::from_settings_with(
            &SandboxSettings::default(),
            in_cluster,
            Some(home.path().to_path_buf()),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://home:6443");
        assert!(client.token.is_none());
    }

    #[test]
    fn test_explicit_api_server_skips_kubeconfig() {
        let settings = SandboxSettings::default()
            .api_server("http://localhost:9000")
            .kubeconfig("/nonexistent/kubeconfig");
        let client = KubeApiClient::from_settings_with(&settings, |_| None, None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_missing_explicit_kubeconfig() {
        let settings = SandboxSettings::default().kubeconfig("/nonexistent/kubeconfig");
        let err = KubeApiClient::from_settings_with(&settings, |_| None, None).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = KubeApiClient::new("http://localhost:8001/", None, None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8001");
        assert_eq!(
            client.pod_url("default", "p1"),
            "http://localhost:8001/api/v1/namespaces/default/pods/p1"
        );
    }

    #[tokio::test]
    async fn test_version_check_unreachable_server() {
        // Port 1 on loopback refuses connections
        let client = KubeApiClient::new("http://127.0.0.1:1", None, None).unwrap();
        let err = client.probe().await.unwrap_err();
        assert!(matches!(err, ClusterError::Http(_)));
    }
}
