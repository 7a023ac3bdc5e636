/// Stream registry: reconciles streamers against the daemon's workload listing
///
/// Owns one `ContainerStatStreamer` per observable workload, keyed by name
/// since names survive a container restart and ids need not. Reconciliation
/// only touches in-memory state; it never waits on a sample stream.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::core::calculator::{DerivedMetrics, MetricSettings};
use crate::core::dispatcher::{ActionDispatcher, PendingAction};
use crate::core::error::EngineError;
use crate::core::logs::LogStreamer;
use crate::core::streamer::{ContainerStatStreamer, StreamerState};
use crate::core::workload::{ActionKind, ActionParams, WorkloadHandle, WorkloadSource, WorkloadStatus};

/// One row of the dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct MetricView {
    pub name: String,
    pub id: String,
    pub status: WorkloadStatus,
    pub image: String,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ports: Vec<String>,
    pub command: Vec<String>,
    pub metrics: DerivedMetrics,
    /// State of the workload's streamer, if it has one
    pub stream: Option<StreamerState>,
    /// Why the stats stream was lost, until a replacement stream delivers data
    pub stream_failure: Option<String>,
    /// Local receive time of the most recent sample
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// A streamer that stopped itself and was replaced
#[derive(Debug, Clone)]
struct LostStream {
    reason: String,
    last_sample_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Tracked {
    /// Every workload of the latest listing
    workloads: HashMap<String, WorkloadHandle>,
    streamers: HashMap<String, ContainerStatStreamer>,
    lost: HashMap<String, LostStream>,
}

pub struct StreamRegistry {
    tracked: Mutex<Tracked>,
    dispatcher: ActionDispatcher,
    settings: MetricSettings,
}

impl StreamRegistry {
    pub fn new(settings: MetricSettings, action_pool_size: usize) -> Self {
        Self {
            tracked: Mutex::new(Tracked::default()),
            dispatcher: ActionDispatcher::new(action_pool_size),
            settings,
        }
    }

    /// List workloads from `source` and reconcile against them.
    ///
    /// A listing failure leaves every streamer in place and surfaces as
    /// `ListingFailure`, so callers can tell "disconnected" from "no containers".
    pub async fn refresh_from<S>(&self, source: &S) -> Result<Vec<MetricView>, EngineError>
    where
        S: WorkloadSource + ?Sized,
    {
        let listing = source.list_workloads().await.map_err(|e| {
            let reason = format!("{e:#}");
            warn!(%reason, "Failed to list workloads");
            EngineError::ListingFailure { reason }
        })?;

        Ok(self.refresh(&listing))
    }

    /// Reconcile streamers against `listing` and build one view per workload,
    /// in listing order.
    pub fn refresh(&self, listing: &[WorkloadHandle]) -> Vec<MetricView> {
        let mut guard = self.lock();
        let tracked = &mut *guard;
        let observable: HashSet<&str> = listing
            .iter()
            .filter(|w| w.status.is_observable())
            .map(|w| w.name.as_str())
            .collect();

        // Workloads gone from the listing or out of the observable set
        let stale: Vec<String> = tracked
            .streamers
            .keys()
            .filter(|name| !observable.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if let Some(streamer) = tracked.streamers.remove(&name) {
                debug!(workload = %name, "Tearing down streamer");
                streamer.stop();
            }
        }
        tracked.lost.retain(|name, _| observable.contains(name.as_str()));

        for workload in listing.iter().filter(|w| w.status.is_observable()) {
            let live = tracked
                .streamers
                .get(&workload.name)
                .is_some_and(|s| s.is_live());
            if live {
                continue;
            }

            // A streamer that stopped itself is replaced, never restarted
            if let Some(dead) = tracked.streamers.remove(&workload.name) {
                debug!(workload = %workload.name, failure = ?dead.failure(), "Replacing stopped streamer");
                dead.stop();
                if let Some(failure) = dead.failure() {
                    let previous = tracked.lost.remove(&workload.name);
                    let last_sample_at = dead
                        .samples()
                        .received_at
                        .or_else(|| previous.and_then(|lost| lost.last_sample_at));
                    tracked.lost.insert(
                        workload.name.clone(),
                        LostStream {
                            reason: failure.to_string(),
                            last_sample_at,
                        },
                    );
                }
            }

            let streamer = ContainerStatStreamer::new(
                workload.name.clone(),
                workload.daemon.clone(),
                self.settings.clone(),
            );
            match streamer.start() {
                Ok(()) => {
                    tracked.streamers.insert(workload.name.clone(), streamer);
                }
                Err(e) => warn!(workload = %workload.name, error = %e, "Could not start streamer"),
            }
        }

        let previous: HashSet<String> = tracked.workloads.keys().cloned().collect();
        tracked.workloads = listing.iter().map(|w| (w.name.clone(), w.clone())).collect();
        for name in tracked.workloads.keys().filter(|n| !previous.contains(*n)) {
            info!(workload = %name, "Adding workload");
        }
        for name in previous.iter().filter(|n| !tracked.workloads.contains_key(*n)) {
            info!(workload = %name, "Removing workload");
        }

        // A replacement that delivered data clears the lost-stream record
        let streamers = &tracked.streamers;
        tracked
            .lost
            .retain(|name, _| streamers.get(name).map_or(true, |s| s.samples().received == 0));

        listing
            .iter()
            .map(|workload| {
                Self::view(
                    workload,
                    tracked.streamers.get(&workload.name),
                    tracked.lost.get(&workload.name),
                )
            })
            .collect()
    }

    fn view(
        workload: &WorkloadHandle,
        streamer: Option<&ContainerStatStreamer>,
        lost: Option<&LostStream>,
    ) -> MetricView {
        let attributes = workload.daemon.attributes();
        let mut view = MetricView {
            name: workload.name.clone(),
            id: workload.id.clone(),
            status: workload.status,
            image: attributes.image,
            created_at: attributes.created_at,
            started_at: None,
            ports: Vec::new(),
            command: Vec::new(),
            metrics: DerivedMetrics::default(),
            stream: None,
            stream_failure: None,
            last_sample_at: None,
        };

        if workload.status.is_observable() {
            view.started_at = attributes.started_at;
            view.ports = attributes.ports;
            view.command = attributes.command;

            if let Some(streamer) = streamer {
                view.metrics = streamer.current_metrics();
                view.stream = Some(streamer.state());
                view.stream_failure = streamer.failure().map(|e| e.to_string());
                view.last_sample_at = streamer.samples().received_at;
            }
            if let Some(lost) = lost {
                view.stream_failure = view.stream_failure.or_else(|| Some(lost.reason.clone()));
                view.last_sample_at = view.last_sample_at.or(lost.last_sample_at);
            }
        }

        view
    }

    /// Schedule a lifecycle action on a workload of the latest listing
    pub fn dispatch(&self, name: &str, action: ActionKind, params: ActionParams) -> Result<(), EngineError> {
        let workload = self
            .lock()
            .workloads
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkload {
                name: name.to_string(),
            })?;

        self.dispatcher.dispatch(&workload, action, params)
    }

    /// Follow the logs of a workload of the latest listing, in any status
    pub fn open_logs(&self, name: &str, tail: usize) -> Result<LogStreamer, EngineError> {
        let workload = self
            .lock()
            .workloads
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkload {
                name: name.to_string(),
            })?;

        Ok(LogStreamer::start(workload.name, workload.daemon.as_ref(), tail))
    }

    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.dispatcher.pending()
    }

    /// Names that currently own a streamer, sorted
    pub fn streamer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().streamers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn streamer_state(&self, name: &str) -> Option<StreamerState> {
        self.lock().streamers.get(name).map(|s| s.state())
    }

    /// Stop every streamer and forget all workloads
    pub fn shutdown(&self) {
        let mut tracked = self.lock();
        for (name, streamer) in tracked.streamers.drain() {
            debug!(workload = %name, "Shutting down streamer");
            streamer.stop();
        }
        tracked.workloads.clear();
        tracked.lost.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(MetricSettings::default(), crate::core::dispatcher::DEFAULT_ACTION_POOL_SIZE)
    }
}
