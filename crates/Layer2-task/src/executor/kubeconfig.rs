//! Kubeconfig - credentials for a cluster reached from outside it
//!
//! Only the parts the REST client can use are read: the current context, its
//! cluster (server, CA, TLS verification) and its user (bearer token or client
//! certificate). File references are resolved against the kubeconfig's own
//! directory; `*-data` fields are base64.

use super::cluster::{ClusterCredentials, ClusterError};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Colon-separated (platform path separator) list of kubeconfig files
pub const ENV_KUBECONFIG: &str = "KUBECONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub current_context: Option<String>,

    #[serde(default)]
    pub clusters: Vec<NamedCluster>,

    #[serde(default)]
    pub contexts: Vec<NamedContext>,

    #[serde(default)]
    pub users: Vec<NamedUser>,

    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<PathBuf>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default)]
    pub client_key_data: Option<String>,
    /// Credential plugins are not run
    #[serde(default)]
    pub exec: Option<serde_yaml::Value>,
}

impl Kubeconfig {
    pub fn read(path: &Path) -> Result<Self, ClusterError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Config(format!("Failed to read kubeconfig {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&content, base_dir).map_err(|e| match e {
            ClusterError::Config(msg) => {
                ClusterError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Parse kubeconfig YAML; relative file references resolve under `base_dir`
    pub fn parse(yaml: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ClusterError> {
        let mut config: Kubeconfig = serde_yaml::from_str(yaml)
            .map_err(|e| ClusterError::Config(format!("Invalid kubeconfig: {}", e)))?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    pub fn current_context(&self) -> Result<&ContextEntry, ClusterError> {
        let name = self
            .current_context
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ClusterError::Config("kubeconfig has no current-context".to_string()))?;
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| ClusterError::Config(format!("context {:?} not found in kubeconfig", name)))
    }

    /// Credentials for the current context
    pub fn credentials(&self) -> Result<ClusterCredentials, ClusterError> {
        let context = self.current_context()?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                ClusterError::Config(format!(
                    "cluster {:?} not found in kubeconfig",
                    context.cluster
                ))
            })?;

        let mut credentials = ClusterCredentials {
            server: cluster.server.clone(),
            insecure: cluster.insecure_skip_tls_verify,
            ca_pem: self.material(
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
            )?,
            ..ClusterCredentials::default()
        };

        let user = match &context.user {
            Some(name) => Some(
                self.users
                    .iter()
                    .find(|u| &u.name == name)
                    .map(|u| &u.user)
                    .ok_or_else(|| {
                        ClusterError::Config(format!("user {:?} not found in kubeconfig", name))
                    })?,
            ),
            None => None,
        };

        if let Some(user) = user {
            credentials.token = match (&user.token, &user.token_file) {
                (Some(token), _) => Some(token.trim().to_string()),
                (None, Some(path)) => Some(
                    String::from_utf8_lossy(&self.read_file(path)?)
                        .trim()
                        .to_string(),
                ),
                (None, None) => None,
            };

            let cert = self.material(
                user.client_certificate_data.as_deref(),
                user.client_certificate.as_deref(),
            )?;
            let key = self.material(user.client_key_data.as_deref(), user.client_key.as_deref())?;
            credentials.identity_pem = match (cert, key) {
                (Some(mut cert), Some(key)) => {
                    cert.push(b'\n');
                    cert.extend_from_slice(&key);
                    Some(cert)
                }
                (None, None) => None,
                _ => {
                    return Err(ClusterError::Config(
                        "client certificate and key must be given together".to_string(),
                    ))
                }
            };

            if credentials.token.is_none() && credentials.identity_pem.is_none() && user.exec.is_some()
            {
                return Err(ClusterError::Config(
                    "exec credential plugins are not supported".to_string(),
                ));
            }
        }

        Ok(credentials)
    }

    /// Inline base64 data wins over a file reference
    fn material(&self, data: Option<&str>, file: Option<&Path>) -> Result<Option<Vec<u8>>, ClusterError> {
        if let Some(data) = data {
            let bytes = STANDARD
                .decode(data.trim())
                .map_err(|e| ClusterError::Config(format!("Invalid base64 in kubeconfig: {}", e)))?;
            return Ok(Some(bytes));
        }
        file.map(|path| self.read_file(path)).transpose()
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, ClusterError> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        std::fs::read(&path)
            .map_err(|e| ClusterError::Config(format!("Failed to read {}: {}", path.display(), e)))
    }
}

/// Kubeconfig to use: `explicit`, else the first existing `$KUBECONFIG`
/// entry, else `<home>/.kube/config` when present
pub fn locate<F>(explicit: Option<&Path>, lookup: F, home: Option<&Path>) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(list) = lookup(ENV_KUBECONFIG) {
        if let Some(path) = std::env::split_paths(&list).find(|p| p.is_file()) {
            return Some(path);
        }
    }
    home.map(|h| h.join(".kube").join("config"))
        .filter(|p| p.is_file())
}
