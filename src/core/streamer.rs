/// Background stats sampling for one workload
///
/// A streamer goes Idle -> Streaming -> Stopped and never back. Its sampling
/// loop runs on its own tokio task and is the only writer of the sample pair;
/// readers get a consistent (latest, previous) snapshot through a watch channel.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::calculator::{DerivedMetrics, MetricSettings};
use crate::core::error::EngineError;
use crate::core::sample::RawSample;
use crate::core::workload::{ContainerRef, SampleStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerState {
    Idle,
    Streaming,
    Stopped,
}

/// The two most recent samples, swapped as one value
#[derive(Debug, Clone, Default)]
pub struct SamplePair {
    pub latest: Option<Arc<RawSample>>,
    pub previous: Option<Arc<RawSample>>,
    /// Local receive time of `latest`
    pub received_at: Option<DateTime<Utc>>,
    pub received: u64,
}

impl SamplePair {
    fn push(&mut self, sample: RawSample) {
        self.previous = self.latest.take();
        self.latest = Some(Arc::new(sample));
        self.received_at = Some(Utc::now());
        self.received += 1;
    }
}

struct Lifecycle {
    state: StreamerState,
    failure: Option<EngineError>,
    started_at: Option<DateTime<Utc>>,
    task: Option<JoinHandle<()>>,
    // Handed to the sampling task on start
    sender: Option<watch::Sender<SamplePair>>,
}

pub struct ContainerStatStreamer {
    name: String,
    source: Arc<dyn ContainerRef>,
    settings: MetricSettings,
    samples: watch::Receiver<SamplePair>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl ContainerStatStreamer {
    pub fn new(name: impl Into<String>, source: Arc<dyn ContainerRef>, settings: MetricSettings) -> Self {
        let (sender, samples) = watch::channel(SamplePair::default());

        Self {
            name: name.into(),
            source,
            settings,
            samples,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: StreamerState::Idle,
                failure: None,
                started_at: None,
                task: None,
                sender: Some(sender),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the sample stream and spawn the sampling loop.
    ///
    /// Must be called from within a tokio runtime. Only legal from `Idle`.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut lifecycle = lock(&self.lifecycle);

        let sender = match (lifecycle.state, lifecycle.sender.take()) {
            (StreamerState::Idle, Some(sender)) => sender,
            (state, sender) => {
                lifecycle.sender = sender;
                return Err(EngineError::IllegalTransition {
                    name: self.name.clone(),
                    state,
                });
            }
        };

        let stream = self.source.open_sample_stream();
        let task = tokio::spawn(sample_loop(
            self.name.clone(),
            stream,
            sender,
            Arc::clone(&self.lifecycle),
        ));

        lifecycle.state = StreamerState::Streaming;
        lifecycle.started_at = Some(Utc::now());
        lifecycle.task = Some(task);
        info!(workload = %self.name, "Started stats streamer");

        Ok(())
    }

    /// Cancel the sampling loop and release the stream. Stopping twice is a no-op.
    pub fn stop(&self) {
        let mut lifecycle = lock(&self.lifecycle);

        match lifecycle.state {
            StreamerState::Stopped => {}
            StreamerState::Idle => {
                lifecycle.state = StreamerState::Stopped;
                lifecycle.sender = None;
            }
            StreamerState::Streaming => {
                lifecycle.state = StreamerState::Stopped;
                // Aborting drops the stream at its pending read
                if let Some(task) = lifecycle.task.take() {
                    task.abort();
                }
                info!(workload = %self.name, "Stopped stats streamer");
            }
        }
    }

    pub fn state(&self) -> StreamerState {
        lock(&self.lifecycle).state
    }

    pub fn is_live(&self) -> bool {
        self.state() == StreamerState::Streaming
    }

    /// Why the streamer stopped itself, if it did
    pub fn failure(&self) -> Option<EngineError> {
        lock(&self.lifecycle).failure.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.lifecycle).started_at
    }

    pub fn samples(&self) -> SamplePair {
        self.samples.borrow().clone()
    }

    /// Metrics from the latest sample pair. Never blocks on the stream; after
    /// the streamer stops the last known values stay frozen.
    pub fn current_metrics(&self) -> DerivedMetrics {
        let pair = self.samples();
        DerivedMetrics::from_samples(pair.latest.as_deref(), pair.previous.as_deref(), &self.settings)
    }
}

impl Drop for ContainerStatStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_loop(
    name: String,
    mut stream: SampleStream,
    sender: watch::Sender<SamplePair>,
    lifecycle: Arc<Mutex<Lifecycle>>,
) {
    let failure = loop {
        match stream.next().await {
            Some(Ok(sample)) => {
                sender.send_modify(|pair| pair.push(sample));
            }
            Some(Err(e)) if !e.is_terminal_for_stream() => {
                debug!(workload = %name, error = %e, "Dropping malformed sample");
            }
            Some(Err(e)) => break e.to_string(),
            None => break "stream closed by daemon".to_string(),
        }
    };

    // Release the connection before reporting
    drop(stream);

    let mut guard = lock(&lifecycle);
    if guard.state == StreamerState::Streaming {
        warn!(workload = %name, reason = %failure, "Stats stream ended, streamer stopped");
        guard.state = StreamerState::Stopped;
        guard.failure = Some(EngineError::StreamReadFailure { name, reason: failure });
        guard.task = None;
    }
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}
