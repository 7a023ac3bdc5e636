/// Error taxonomy for the stats engine

use thiserror::Error;

use crate::core::streamer::StreamerState;
use crate::core::workload::ActionKind;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The sample stream of a workload ended or errored. Terminal for that streamer.
    #[error("stats stream for '{name}' failed: {reason}")]
    StreamReadFailure { name: String, reason: String },

    /// A sample could not be decoded. The sample is dropped, sampling continues.
    #[error("malformed stats sample: {reason}")]
    MalformedSample { reason: String },

    #[error("action '{action}' already in progress for '{name}'")]
    ActionInProgress { name: String, action: ActionKind },

    #[error("unknown workload '{name}'")]
    UnknownWorkload { name: String },

    /// The daemon could not enumerate workloads (lost connection, daemon down).
    #[error("failed to list workloads: {reason}")]
    ListingFailure { reason: String },

    #[error("streamer for '{name}' cannot start from state {state:?}")]
    IllegalTransition { name: String, state: StreamerState },

    #[error("cannot connect to docker daemon: {reason}")]
    Connection { reason: String },
}

impl EngineError {
    /// Whether a stream item carrying this error should end the sampling loop
    pub fn is_terminal_for_stream(&self) -> bool {
        !matches!(self, EngineError::MalformedSample { .. })
    }
}
