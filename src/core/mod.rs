pub mod calculator;
pub mod dispatcher;
pub mod docker;
pub mod error;
pub mod logs;
pub mod registry;
pub mod sample;
pub mod streamer;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

pub use calculator::{DerivedMetrics, InterfaceSelector, MetricSettings};
pub use dispatcher::ActionDispatcher;
pub use docker::DockerClient;
pub use error::EngineError;
pub use logs::{LogStreamer, DEFAULT_LOG_TAIL};
pub use registry::{MetricView, StreamRegistry};
pub use streamer::{ContainerStatStreamer, StreamerState};
pub use workload::{ActionKind, ActionParams, WorkloadHandle, WorkloadSource, WorkloadStatus};
