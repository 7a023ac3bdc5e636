/// Docker daemon integration
///
/// Lists containers, streams their stats and logs and issues lifecycle calls
/// through the Docker Engine API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogsOptions,
    RestartContainerOptions, StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

use crate::core::error::EngineError;
use crate::core::sample::{parse_daemon_time, RawSample};
use crate::core::workload::{
    ActionKind, ActionParams, ContainerRef, LogStream, SampleStream, WorkloadAttributes,
    WorkloadHandle, WorkloadSource, WorkloadStatus,
};
use crate::utils::AppConfig;

const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Connection to one Docker daemon
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
    endpoint: String,
    list_all: bool,
}

impl DockerClient {
    /// Connect using `docker_socket_url` from the configuration, or the local
    /// defaults (DOCKER_HOST, then the platform socket) when it is unset.
    pub fn connect(config: &AppConfig) -> Result<Self, EngineError> {
        let url = config
            .docker_socket_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let connected = match url {
            Some(url) if url.starts_with("unix://") => {
                Docker::connect_with_unix(url, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(url) if url.starts_with("tcp://") || url.starts_with("http://") => {
                Docker::connect_with_http(url, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(url) => {
                return Err(EngineError::Connection {
                    reason: format!("unsupported docker url scheme: {url}"),
                })
            }
            None => Docker::connect_with_local_defaults(),
        };

        let docker = connected.map_err(|e| EngineError::Connection {
            reason: e.to_string(),
        })?;

        Ok(Self {
            docker,
            endpoint: url.unwrap_or("local").to_string(),
            list_all: config.list_all_containers,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Daemon version string, e.g. "24.0.7 (API 1.43)"
    pub async fn version(&self) -> Result<String> {
        let version = self
            .docker
            .version()
            .await
            .context("Failed to query Docker version")?;

        let engine = version.version.unwrap_or_else(|| "unknown".to_string());
        Ok(match version.api_version {
            Some(api) => format!("{engine} (API {api})"),
            None => engine,
        })
    }

    /// Check if Docker daemon is accessible
    pub async fn check_docker(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Look a workload up by name in a fresh listing
    pub async fn find(&self, name: &str) -> Result<Option<WorkloadHandle>> {
        let workloads = self.list_workloads().await?;
        Ok(workloads.into_iter().find(|w| w.name == name))
    }

    fn container(&self, summary: &ContainerSummary) -> DockerContainer {
        let id = summary.id.clone().unwrap_or_default();
        DockerContainer {
            docker: self.docker.clone(),
            name: workload_name(summary),
            attributes: WorkloadAttributes {
                image: summary.image.clone().unwrap_or_else(|| "unknown".to_string()),
                created_at: summary.created.and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
                ..Default::default()
            },
            id,
        }
    }

    /// Read start time, command and exposed ports of a running container
    async fn inspect_into(&self, container: &mut DockerContainer) {
        match self
            .docker
            .inspect_container(&container.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => apply_inspect(&mut container.attributes, &inspect),
            // Listing stays usable; the row only lacks the inspected columns
            Err(e) => debug!(workload = %container.name, error = %e, "Inspect failed"),
        }
    }
}

#[async_trait]
impl WorkloadSource for DockerClient {
    async fn list_workloads(&self) -> Result<Vec<WorkloadHandle>> {
        let options = Some(ListContainersOptions::<String> {
            all: self.list_all,
            ..Default::default()
        });

        let summaries = self
            .docker
            .list_containers(options)
            .await
            .context("Failed to list containers")?;

        let mut containers: Vec<(WorkloadStatus, DockerContainer)> = summaries
            .iter()
            .map(|summary| {
                let status = WorkloadStatus::from(summary.state.as_deref().unwrap_or("unknown"));
                (status, self.container(summary))
            })
            .collect();

        // Inspect observable containers in parallel
        let inspections = containers
            .iter_mut()
            .filter(|(status, _)| status.is_observable())
            .map(|(_, container)| self.inspect_into(container));
        join_all(inspections).await;

        Ok(containers
            .into_iter()
            .map(|(status, container)| {
                WorkloadHandle::new(
                    container.name.clone(),
                    container.id.clone(),
                    status,
                    Arc::new(container),
                )
            })
            .collect())
    }
}

/// Daemon-side reference to one container
pub struct DockerContainer {
    docker: Docker,
    id: String,
    name: String,
    attributes: WorkloadAttributes,
}

#[async_trait]
impl ContainerRef for DockerContainer {
    fn attributes(&self) -> WorkloadAttributes {
        self.attributes.clone()
    }

    fn open_sample_stream(&self) -> SampleStream {
        let name = self.name.clone();
        self.docker
            .stats(
                &self.id,
                Some(StatsOptions {
                    stream: true,
                    one_shot: false,
                }),
            )
            .map(move |item| match item {
                Ok(stats) => Ok(RawSample::from_stats(stats, Utc::now())),
                Err(e) => Err(stream_error(&name, e)),
            })
            .boxed()
    }

    fn open_log_stream(&self, tail: usize) -> LogStream {
        let name = self.name.clone();
        self.docker
            .logs(
                &self.id,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    tail: tail.to_string(),
                    ..Default::default()
                }),
            )
            .map(move |item| match item {
                Ok(output) => Ok(output.to_string()),
                Err(e) => Err(EngineError::StreamReadFailure {
                    name: name.clone(),
                    reason: e.to_string(),
                }),
            })
            .boxed()
    }

    async fn invoke(&self, action: ActionKind, params: &ActionParams) -> Result<()> {
        let id = self.id.as_str();
        let outcome = match action {
            ActionKind::Start => {
                self.docker
                    .start_container(id, None::<StartContainerOptions<String>>)
                    .await
            }
            ActionKind::Stop => {
                let options = params.timeout_secs.map(|t| StopContainerOptions { t });
                self.docker.stop_container(id, options).await
            }
            ActionKind::Restart => {
                let options = params
                    .timeout_secs
                    .map(|t| RestartContainerOptions { t: t as isize });
                self.docker.restart_container(id, options).await
            }
            ActionKind::Pause => self.docker.pause_container(id).await,
            ActionKind::Resume => self.docker.unpause_container(id).await,
            ActionKind::Kill => {
                let signal = params.signal.clone().unwrap_or_else(|| "SIGKILL".to_string());
                self.docker
                    .kill_container(id, Some(KillContainerOptions { signal }))
                    .await
            }
        };

        outcome.with_context(|| format!("Failed to {} container {}", action, self.name))
    }
}

/// Decode errors only spoil one sample; anything else ends the stream
fn stream_error(name: &str, error: DockerError) -> EngineError {
    match error {
        DockerError::JsonDataError { .. } | DockerError::JsonSerdeError { .. } => {
            EngineError::MalformedSample {
                reason: error.to_string(),
            }
        }
        other => EngineError::StreamReadFailure {
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}

/// First container name without the leading slash, or the short id
fn workload_name(summary: &ContainerSummary) -> String {
    summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| summary.id.as_ref().map(|id| id.chars().take(12).collect()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_inspect(attributes: &mut WorkloadAttributes, inspect: &ContainerInspectResponse) {
    attributes.started_at = inspect
        .state
        .as_ref()
        .and_then(|state| state.started_at.as_deref())
        .and_then(parse_daemon_time);

    if attributes.created_at.is_none() {
        attributes.created_at = inspect.created.as_deref().and_then(parse_daemon_time);
    }

    if let Some(config) = &inspect.config {
        attributes.command = config
            .entrypoint
            .iter()
            .flatten()
            .chain(config.cmd.iter().flatten())
            .cloned()
            .collect();

        let mut ports: Vec<String> = config
            .exposed_ports
            .as_ref()
            .map(|ports| ports.keys().cloned().collect())
            .unwrap_or_default();
        ports.sort();
        attributes.ports = ports;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerConfig, ContainerState};
    use std::collections::HashMap;

    fn summary(names: Option<Vec<&str>>, id: &str) -> ContainerSummary {
        ContainerSummary {
            id: Some(id.to_string()),
            names: names.map(|n| n.into_iter().map(String::from).collect()),
            image: Some("redis:7".to_string()),
            state: Some("running".to_string()),
            created: Some(1_700_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_workload_name() {
        assert_eq!(workload_name(&summary(Some(vec!["/web", "/alias"]), "abc")), "web");
        assert_eq!(
            workload_name(&summary(None, "0123456789abcdef0123")),
            "0123456789ab"
        );
    }

    #[test]
    fn test_apply_inspect() {
        let mut exposed = HashMap::new();
        exposed.insert("443/tcp".to_string(), HashMap::new());
        exposed.insert("80/tcp".to_string(), HashMap::new());

        let inspect = ContainerInspectResponse {
            state: Some(ContainerState {
                started_at: Some("2024-03-01T10:15:30Z".to_string()),
                ..Default::default()
            }),
            config: Some(ContainerConfig {
                entrypoint: Some(vec!["/docker-entrypoint.sh".to_string()]),
                cmd: Some(vec!["nginx".to_string(), "-g".to_string(), "daemon off;".to_string()]),
                exposed_ports: Some(exposed),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut attributes = WorkloadAttributes::default();
        apply_inspect(&mut attributes, &inspect);

        assert_eq!(
            attributes.started_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap())
        );
        assert_eq!(
            attributes.command,
            vec!["/docker-entrypoint.sh", "nginx", "-g", "daemon off;"]
        );
        assert_eq!(attributes.ports, vec!["443/tcp", "80/tcp"]);
    }

    #[test]
    fn test_never_started_container() {
        let inspect = ContainerInspectResponse {
            state: Some(ContainerState {
                started_at: Some("0001-01-01T00:00:00Z".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut attributes = WorkloadAttributes::default();
        apply_inspect(&mut attributes, &inspect);
        assert_eq!(attributes.started_at, None);
        assert!(attributes.command.is_empty());
    }

    #[test]
    fn test_stream_error_classification() {
        let malformed = DockerError::JsonSerdeError {
            err: serde_json::from_str::<u64>("{").unwrap_err(),
        };
        assert!(!stream_error("web", malformed).is_terminal_for_stream());

        let transport = DockerError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(matches!(
            stream_error("web", transport),
            EngineError::StreamReadFailure { ref name, .. } if name == "web"
        ));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let config = AppConfig {
            docker_socket_url: Some("ftp://nowhere".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            DockerClient::connect(&config),
            Err(EngineError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_docker_unreachable() {
        let config = AppConfig {
            docker_socket_url: Some("tcp://127.0.0.1:1".to_string()),
            ..Default::default()
        };
        let client = DockerClient::connect(&config).unwrap();
        assert_eq!(client.endpoint(), "tcp://127.0.0.1:1");
        assert!(!client.check_docker().await);
    }

    #[tokio::test]
    async fn test_docker_client_listing() {
        // This test requires Docker to be running
        if let Ok(client) = DockerClient::connect(&AppConfig::default()) {
            if client.check_docker().await {
                let workloads = client.list_workloads().await.unwrap();
                assert!(workloads.iter().all(|w| !w.name.is_empty()));
            }
        }
    }
}
