/// Workload identity and the capability interface the engine needs from a daemon client
///
/// Any daemon client that can list workloads, open sample and log streams for
/// one of them and invoke lifecycle actions can drive the engine. The bollard-backed
/// implementation lives in `core::docker`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

use crate::core::error::EngineError;
use crate::core::sample::RawSample;

/// Blocking source of raw samples for one workload. Dropping it releases the stream.
pub type SampleStream = BoxStream<'static, Result<RawSample, EngineError>>;

/// Followed stdout and stderr of one workload, as text chunks in arrival order
pub type LogStream = BoxStream<'static, Result<String, EngineError>>;

/// Lifecycle status as reported by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadStatus {
    Created,
    Restarting,
    Running,
    Paused,
    Exited,
    Dead,
    Unknown,
}

impl From<&str> for WorkloadStatus {
    fn from(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "created" => WorkloadStatus::Created,
            "restarting" => WorkloadStatus::Restarting,
            "running" => WorkloadStatus::Running,
            "paused" => WorkloadStatus::Paused,
            "exited" => WorkloadStatus::Exited,
            // A container being removed is as good as dead for streaming purposes
            "dead" | "removing" => WorkloadStatus::Dead,
            _ => WorkloadStatus::Unknown,
        }
    }
}

impl WorkloadStatus {
    /// Statuses for which stats streaming is meaningful
    pub fn is_observable(&self) -> bool {
        matches!(self, WorkloadStatus::Running | WorkloadStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadStatus::Created => "created",
            WorkloadStatus::Restarting => "restarting",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Paused => "paused",
            WorkloadStatus::Exited => "exited",
            WorkloadStatus::Dead => "dead",
            WorkloadStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle commands an operator can issue against a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Start,
    Stop,
    Restart,
    Pause,
    Resume,
    Kill,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Restart => "restart",
            ActionKind::Pause => "pause",
            ActionKind::Resume => "resume",
            ActionKind::Kill => "kill",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional knobs for a lifecycle call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionParams {
    /// Grace period before the daemon kills the container (stop/restart)
    pub timeout_secs: Option<i64>,
    /// Signal sent by `kill` (daemon default is SIGKILL)
    pub signal: Option<String>,
}

/// Static attributes read from the daemon-side object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadAttributes {
    pub image: String,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ports: Vec<String>,
    /// Entrypoint followed by command
    pub command: Vec<String>,
}

/// Daemon-side object of one workload
#[async_trait]
pub trait ContainerRef: Send + Sync {
    fn attributes(&self) -> WorkloadAttributes;

    /// Open the raw sample stream. Called once per streamer lifetime.
    fn open_sample_stream(&self) -> SampleStream;

    /// Follow the workload's output, starting with its last `tail` lines
    fn open_log_stream(&self, tail: usize) -> LogStream;

    async fn invoke(&self, action: ActionKind, params: &ActionParams) -> anyhow::Result<()>;
}

/// Something that can enumerate the workloads of a daemon
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Fails when the daemon cannot be reached; an empty list means no containers.
    async fn list_workloads(&self) -> anyhow::Result<Vec<WorkloadHandle>>;
}

/// One workload as seen in the latest listing
#[derive(Clone)]
pub struct WorkloadHandle {
    pub name: String,
    pub id: String,
    pub status: WorkloadStatus,
    pub daemon: Arc<dyn ContainerRef>,
}

impl WorkloadHandle {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        status: WorkloadStatus,
        daemon: Arc<dyn ContainerRef>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            status,
            daemon,
        }
    }
}

impl fmt::Debug for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
