//! Container runtime access.
//!
//! The lifecycle manager talks to the runtime through the
//! [`ContainerRuntime`] trait so tests can substitute a recording double.
//! [`DockerRuntime`] is the production implementation backed by the local
//! docker daemon via bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{HostConfig, RestartPolicy};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{Result, WebshellError};

/// Everything needed to create one webshell container. The manager fills
/// this in; the runtime only translates it to the daemon's API.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub pids_limit: i64,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub restart_policy: String,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    /// Runtime state string (`running`, `exited`, `created`, ...).
    pub status: String,
    pub labels: HashMap<String, String>,
}

impl ContainerHandle {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make sure the named bridge network exists, creating it when missing.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// Look up a container by exact name. `Ok(None)` when absent.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerHandle>>;

    /// Create the container and return its id. Does not start it. Fails
    /// with [`WebshellError::NameConflict`] when the name is taken and
    /// [`WebshellError::ImageMissing`] when the image is not present.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// List containers, running or not, whose name matches `prefix`. The
    /// daemon filter is a substring match; callers needing an exact prefix
    /// must post-filter.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerHandle>>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str, timeout_secs: i64) -> Result<()>;

    /// Force-remove a container.
    async fn remove_container(&self, name: &str) -> Result<()>;

    async fn restart_container(&self, name: &str, timeout_secs: i64) -> Result<()>;
}

/// Production runtime backed by the local docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (unix socket on Linux).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| WebshellError::runtime(format!("cannot reach docker daemon: {e}")))?;
        Ok(Self { docker })
    }
}

fn runtime_err(err: DockerError) -> WebshellError {
    WebshellError::Runtime(err.to_string())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self, name: &str) -> Result<()> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(runtime_err)?;

        let exists = networks
            .iter()
            .any(|n| n.name.as_deref() == Some(name));
        if exists {
            debug!(network = %name, "network already exists");
            return Ok(());
        }

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };
        self.docker
            .create_network(options)
            .await
            .map_err(runtime_err)?;
        info!(network = %name, "created webshell network");
        Ok(())
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerHandle>> {
        match self.docker.inspect_container(name, None).await {
            Ok(info) => {
                let status = info
                    .state
                    .as_ref()
                    .and_then(|s| s.status)
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let labels = info.config.and_then(|c| c.labels).unwrap_or_default();
                Ok(Some(ContainerHandle {
                    id: info.id.unwrap_or_default(),
                    // The daemon reports names with a leading slash.
                    name: info
                        .name
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| name.to_string()),
                    status,
                    labels,
                }))
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(err) => Err(runtime_err(err)),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            memory: Some(spec.memory_bytes),
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(spec.cpu_period),
            pids_limit: Some(spec.pids_limit),
            restart_policy: Some(RestartPolicy {
                name: spec.restart_policy.parse().ok(),
                maximum_retry_count: None,
            }),
            cap_drop: Some(spec.cap_drop.clone()),
            cap_add: Some(spec.cap_add.clone()),
            security_opt: Some(spec.security_opt.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(response) => Ok(response.id),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(WebshellError::ImageMissing(spec.image.clone())),
            Err(DockerError::DockerResponseServerError {
                status_code: 409, ..
            }) => Err(WebshellError::NameConflict(spec.name.clone())),
            Err(err) => Err(runtime_err(err)),
        }
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerHandle>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(runtime_err)?;

        Ok(summaries
            .into_iter()
            .map(|c| {
                let name = c
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                ContainerHandle {
                    id: c.id.unwrap_or_default(),
                    name,
                    status: c.state.unwrap_or_default(),
                    labels: c.labels.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(WebshellError::NotFound(name.to_string())),
            Err(err) => Err(runtime_err(err)),
        }
    }

    async fn stop_container(&self, name: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => {
                debug!(container = %name, "container stopped");
                Ok(())
            }
            // Already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(WebshellError::NotFound(name.to_string())),
            Err(err) => Err(runtime_err(err)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => {
                debug!(container = %name, "container removed");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(WebshellError::NotFound(name.to_string())),
            Err(err) => Err(runtime_err(err)),
        }
    }

    async fn restart_container(&self, name: &str, timeout_secs: i64) -> Result<()> {
        let options = RestartContainerOptions {
            t: timeout_secs as isize,
        };
        match self.docker.restart_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(WebshellError::NotFound(name.to_string())),
            Err(err) => Err(runtime_err(err)),
        }
    }
}
