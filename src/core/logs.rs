/// Live log following for one workload
///
/// The log stream is read on its own tokio task into a bounded buffer that the
/// UI drains each frame. Chunks from the daemon are split into lines; a trailing
/// partial line waits for the rest of its text.

use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::workload::{ContainerRef, LogStream};

/// Lines of history requested when a log stream is opened
pub const DEFAULT_LOG_TAIL: usize = 200;

/// Oldest undrained lines are discarded beyond this
const MAX_PENDING_LINES: usize = 5000;

#[derive(Default)]
struct LogBuffer {
    pending: VecDeque<String>,
    partial: String,
    /// Set once the stream ended or failed
    ended: Option<String>,
}

impl LogBuffer {
    fn push_chunk(&mut self, chunk: &str) {
        self.partial.push_str(chunk);
        let Some(end) = self.partial.rfind('\n') else {
            return;
        };

        let rest = self.partial.split_off(end + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        for line in complete.lines() {
            self.push_line(line.to_string());
        }
    }

    fn push_line(&mut self, line: String) {
        if self.pending.len() == MAX_PENDING_LINES {
            self.pending.pop_front();
        }
        self.pending.push_back(line);
    }

    fn finish(&mut self, reason: String) {
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            self.push_line(rest);
        }
        self.ended = Some(reason);
    }
}

pub struct LogStreamer {
    name: String,
    buffer: Arc<Mutex<LogBuffer>>,
    task: JoinHandle<()>,
}

impl LogStreamer {
    /// Open the log stream of `source` and start following it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(name: impl Into<String>, source: &dyn ContainerRef, tail: usize) -> Self {
        let name = name.into();
        let buffer = Arc::new(Mutex::new(LogBuffer::default()));
        let task = tokio::spawn(follow(
            name.clone(),
            source.open_log_stream(tail),
            Arc::clone(&buffer),
        ));
        info!(workload = %name, tail, "Following logs");

        Self { name, buffer, task }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Complete lines received since the previous call
    pub fn take_lines(&self) -> Vec<String> {
        lock(&self.buffer).pending.drain(..).collect()
    }

    /// Why the stream ended, once it has
    pub fn ended(&self) -> Option<String> {
        lock(&self.buffer).ended.clone()
    }

    /// Stop following and release the stream
    pub fn stop(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            debug!(workload = %self.name, "Stopped following logs");
        }
    }
}

impl Drop for LogStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn follow(name: String, mut stream: LogStream, buffer: Arc<Mutex<LogBuffer>>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(chunk)) => lock(&buffer).push_chunk(&chunk),
            Some(Err(e)) => break e.to_string(),
            None => break "log stream closed".to_string(),
        }
    };

    drop(stream);
    debug!(workload = %name, %reason, "Log stream ended");
    lock(&buffer).finish(reason);
}

fn lock(buffer: &Mutex<LogBuffer>) -> MutexGuard<'_, LogBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use crate::core::testing::{wait_until, FakeContainer};
    use std::time::Duration;

    #[tokio::test]
    async fn test_chunks_are_split_into_lines() {
        let (container, tx) = FakeContainer::with_logs();
        let logs = LogStreamer::start("web", container.as_ref(), 50);

        tx.send(Ok("GET / 200\nGET /hea".to_string())).unwrap();
        tx.send(Ok("lth 200\r\n".to_string())).unwrap();

        let mut lines = Vec::new();
        assert!(wait_until(|| {
            lines.extend(logs.take_lines());
            lines.len() == 2
        })
        .await);
        assert_eq!(lines, vec!["GET / 200", "GET /health 200"]);
        assert_eq!(container.log_tail(), Some(50));

        // Drained lines are not handed out twice
        assert!(logs.take_lines().is_empty());
    }

    #[tokio::test]
    async fn test_stream_end_flushes_partial_line() {
        let (container, tx) = FakeContainer::with_logs();
        let logs = LogStreamer::start("web", container.as_ref(), DEFAULT_LOG_TAIL);

        tx.send(Ok("shutting down".to_string())).unwrap();
        drop(tx);

        assert!(wait_until(|| logs.ended().is_some()).await);
        assert_eq!(logs.take_lines(), vec!["shutting down"]);
        assert_eq!(logs.ended().as_deref(), Some("log stream closed"));
    }

    #[tokio::test]
    async fn test_stream_error_ends_following() {
        let (container, tx) = FakeContainer::with_logs();
        let logs = LogStreamer::start("web", container.as_ref(), DEFAULT_LOG_TAIL);

        tx.send(Err(EngineError::StreamReadFailure {
            name: "web".into(),
            reason: "connection reset".into(),
        }))
        .unwrap();

        assert!(wait_until(|| logs.ended().is_some()).await);
        assert!(logs.ended().is_some_and(|reason| reason.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_pending_lines_are_bounded() {
        let (container, tx) = FakeContainer::with_logs();
        let logs = LogStreamer::start("web", container.as_ref(), DEFAULT_LOG_TAIL);

        let burst: String = (0..MAX_PENDING_LINES + 10).map(|i| format!("line {i}\n")).collect();
        tx.send(Ok(burst)).unwrap();
        drop(tx);
        assert!(wait_until(|| logs.ended().is_some()).await);

        let lines = logs.take_lines();
        assert_eq!(lines.len(), MAX_PENDING_LINES);
        assert_eq!(lines[0], "line 10");
    }

    #[tokio::test]
    async fn test_drop_releases_stream() {
        let (container, tx) = FakeContainer::with_logs();
        let logs = LogStreamer::start("web", container.as_ref(), DEFAULT_LOG_TAIL);
        drop(logs);

        let released = tokio::time::timeout(Duration::from_secs(2), tx.closed()).await;
        assert!(released.is_ok());
    }
}
