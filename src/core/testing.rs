/// Fakes shared by the engine's unit tests

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use crate::core::error::EngineError;
use crate::core::sample::{CpuCounters, InterfaceCounters, RawSample};
use crate::core::workload::{
    ActionKind, ActionParams, ContainerRef, LogStream, SampleStream, WorkloadAttributes,
    WorkloadHandle, WorkloadStatus,
};

pub(crate) type SampleSender = mpsc::UnboundedSender<Result<RawSample, EngineError>>;
pub(crate) type LogSender = mpsc::UnboundedSender<Result<String, EngineError>>;

/// Container whose sample stream is fed by the test and whose actions can be held open
pub(crate) struct FakeContainer {
    attributes: WorkloadAttributes,
    stream: Mutex<Option<SampleStream>>,
    logs: Mutex<Option<LogStream>>,
    log_tail: Mutex<Option<usize>>,
    opened: AtomicUsize,
    invoked: Mutex<Vec<ActionKind>>,
    gate: Option<Arc<Semaphore>>,
    fail_actions: bool,
}

impl FakeContainer {
    fn build(stream: Option<SampleStream>, gate: Option<Arc<Semaphore>>, fail_actions: bool) -> Self {
        Self {
            attributes: WorkloadAttributes {
                image: "nginx:latest".to_string(),
                ports: vec!["80/tcp".to_string()],
                command: vec!["nginx".to_string(), "-g".to_string()],
                ..Default::default()
            },
            stream: Mutex::new(stream),
            logs: Mutex::new(None),
            log_tail: Mutex::new(None),
            opened: AtomicUsize::new(0),
            invoked: Mutex::new(Vec::new()),
            gate,
            fail_actions,
        }
    }

    /// Stream driven through the returned sender; dropping the sender closes it
    pub(crate) fn scripted() -> (Arc<Self>, SampleSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::build(Some(channel_stream(rx)), None, false)), tx)
    }

    /// Quiet stats; log stream driven through the returned sender
    pub(crate) fn with_logs() -> (Arc<Self>, LogSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let container = Self::build(None, None, false);
        *container.logs.lock().unwrap() = Some(channel_stream(rx));
        (Arc::new(container), tx)
    }

    /// Stream that never yields
    pub(crate) fn quiet() -> Arc<Self> {
        Arc::new(Self::build(None, None, false))
    }

    /// Lifecycle calls wait for a permit on `gate` before completing
    pub(crate) fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(None, Some(gate), false))
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self::build(None, None, true))
    }

    pub(crate) fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn invoked(&self) -> Vec<ActionKind> {
        self.invoked.lock().unwrap().clone()
    }

    /// Tail requested by the last `open_log_stream`
    pub(crate) fn log_tail(&self) -> Option<usize> {
        *self.log_tail.lock().unwrap()
    }
}

fn channel_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<Result<T, EngineError>>,
) -> futures::stream::BoxStream<'static, Result<T, EngineError>> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[async_trait]
impl ContainerRef for FakeContainer {
    fn attributes(&self) -> WorkloadAttributes {
        self.attributes.clone()
    }

    fn open_sample_stream(&self) -> SampleStream {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.stream
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| futures::stream::pending().boxed())
    }

    fn open_log_stream(&self, tail: usize) -> LogStream {
        *self.log_tail.lock().unwrap() = Some(tail);
        self.logs
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| futures::stream::pending().boxed())
    }

    async fn invoke(&self, action: ActionKind, _params: &ActionParams) -> anyhow::Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.invoked.lock().unwrap().push(action);
        if self.fail_actions {
            anyhow::bail!("daemon refused {}", action);
        }
        Ok(())
    }
}

pub(crate) fn handle(name: &str, status: WorkloadStatus, daemon: Arc<FakeContainer>) -> WorkloadHandle {
    WorkloadHandle::new(name, format!("{name}-0123456789abcdef"), status, daemon)
}

/// Sample with CPU counters (4 online cores) and eth0 rx bytes, `secs` after a fixed epoch
pub(crate) fn cpu_net_sample(secs: i64, cpu_total: u64, system_total: u64, rx: u64) -> RawSample {
    let mut networks = HashMap::new();
    networks.insert(
        "eth0".to_string(),
        InterfaceCounters {
            rx_bytes: rx,
            tx_bytes: 0,
        },
    );

    RawSample {
        read_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(secs),
        cpu: Some(CpuCounters {
            total_usage: cpu_total,
            system_usage: Some(system_total),
            online_cpus: Some(4),
            per_cpu_usage: None,
        }),
        networks: Some(networks),
        ..Default::default()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
