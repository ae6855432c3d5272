//! Task executors
//!
//! Provides two execution backends:
//! - `LocalExecutor` - child process on the host through the platform shell
//! - `SandboxExecutor` - single-use pod in a Kubernetes cluster
//!
//! ## Security
//! - `CommandPolicy` - denylist / metacharacter gate applied on save
//!
//! ## Cluster
//! - `ClusterClient` - pod create/status/logs/delete, `KubeApiClient` over REST
//! - `Kubeconfig` - out-of-cluster credentials for `KubeApiClient`

pub mod cluster;
pub mod error;
pub mod kubeconfig;
pub mod local;
pub mod policy;
pub mod sandbox;
pub mod r#trait;

pub use cluster::{ClusterClient, ClusterCredentials, ClusterError, KubeApiClient, PodManifest};
pub use kubeconfig::Kubeconfig;
pub use error::ExecutionError;
pub use local::{LocalExecutor, LocalExecutorConfig};
pub use policy::{CommandPolicy, RejectionReason, DEFAULT_DENYLIST};
pub use r#trait::Executor;
pub use sandbox::{SandboxBackend, SandboxExecutor};
