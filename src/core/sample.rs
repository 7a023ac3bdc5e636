/// Raw cumulative counters as delivered by the daemon's stats feed
///
/// A `RawSample` is immutable once produced. Every counter group is optional so
/// that a sample missing a group can still be carried through the streamer;
/// the calculator reports the matching metric group as absent.

use bollard::container::{MemoryStatsStats, Stats};
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSample {
    /// When the daemon took the sample
    pub read_at: DateTime<Utc>,
    pub cpu: Option<CpuCounters>,
    pub memory: Option<MemoryCounters>,
    /// Interface name -> cumulative byte counters
    pub networks: Option<HashMap<String, InterfaceCounters>>,
    pub block_io: Option<Vec<BlockIoEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuCounters {
    /// Cumulative CPU time consumed by the container (ns)
    pub total_usage: u64,
    /// Cumulative host CPU time (ns)
    pub system_usage: Option<u64>,
    pub online_cpus: Option<u64>,
    pub per_cpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCounters {
    pub usage: Option<u64>,
    pub limit: Option<u64>,
    pub cache: Option<u64>,
    pub max_usage: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockIoEntry {
    /// Operation tag, e.g. "Read", "Write", "Sync", "Total"
    pub op: String,
    pub value: u64,
}

impl RawSample {
    /// Convert a bollard stats payload. `received_at` stands in for the sample
    /// timestamp when the daemon's `read` field is missing or zero.
    pub fn from_stats(stats: Stats, received_at: DateTime<Utc>) -> Self {
        let read_at = parse_daemon_time(&stats.read).unwrap_or(received_at);

        let cpu = Some(CpuCounters {
            total_usage: stats.cpu_stats.cpu_usage.total_usage,
            system_usage: stats.cpu_stats.system_cpu_usage,
            online_cpus: stats.cpu_stats.online_cpus.map(|n| n as u64),
            per_cpu_usage: stats.cpu_stats.cpu_usage.percpu_usage.clone(),
        });

        let cache = match stats.memory_stats.stats {
            Some(MemoryStatsStats::V1(v1)) => Some(v1.cache),
            Some(MemoryStatsStats::V2(v2)) => Some(v2.file),
            None => None,
        };
        let memory = Some(MemoryCounters {
            usage: stats.memory_stats.usage,
            limit: stats.memory_stats.limit,
            cache,
            max_usage: stats.memory_stats.max_usage,
        });

        let networks = stats.networks.map(|networks| {
            networks
                .into_iter()
                .map(|(name, net)| {
                    (
                        name,
                        InterfaceCounters {
                            rx_bytes: net.rx_bytes,
                            tx_bytes: net.tx_bytes,
                        },
                    )
                })
                .collect()
        });

        let block_io = stats.blkio_stats.io_service_bytes_recursive.map(|entries| {
            entries
                .into_iter()
                .map(|e| BlockIoEntry {
                    op: e.op,
                    value: e.value,
                })
                .collect()
        });

        Self {
            read_at,
            cpu,
            memory,
            networks,
            block_io,
        }
    }
}

/// Parse one of the daemon's RFC 3339 timestamps. The zero time ("0001-01-01T00:00:00Z")
/// means "not set" and is rejected.
pub(crate) fn parse_daemon_time(read: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(read.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}
