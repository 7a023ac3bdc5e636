/// Derived metrics from pairs of raw samples
///
/// Pure functions only. Every function returns `None` when the samples lack the
/// counters it needs, so "unknown" never shows up as "zero usage". Rates need a
/// previous sample, a positive elapsed time and a non-negative counter delta.

use crate::core::sample::{InterfaceCounters, RawSample};

/// Interface whose counters feed the network metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceSelector {
    Named(String),
    /// Sum of every interface in the sample
    All,
}

impl InterfaceSelector {
    /// `*` selects every interface, anything else names one
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "*" => InterfaceSelector::All,
            name => InterfaceSelector::Named(name.to_string()),
        }
    }
}

impl Default for InterfaceSelector {
    fn default() -> Self {
        InterfaceSelector::Named("eth0".to_string())
    }
}

/// Inputs to the calculator that do not come from the samples
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSettings {
    /// Core count used when a sample reports neither online CPUs nor a per-core list
    pub core_count_hint: u64,
    pub interface: InterfaceSelector,
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            core_count_hint: std::thread::available_parallelism()
                .map(|n| n.get() as u64)
                .unwrap_or(1),
            interface: InterfaceSelector::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuStats {
    pub usage_percent: f64,
    pub core_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    pub usage_bytes: u64,
    pub limit_bytes: u64,
    pub cache_bytes: Option<u64>,
    pub max_usage_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetIoStats {
    pub total_rx: u64,
    pub total_tx: u64,
    pub rx_rate_per_sec: Option<f64>,
    pub tx_rate_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskIoStats {
    pub total_read: u64,
    pub total_write: u64,
    pub read_rate_per_sec: Option<f64>,
    pub write_rate_per_sec: Option<f64>,
}

/// Metric groups of one workload, each independently absent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedMetrics {
    pub cpu: Option<CpuStats>,
    pub memory: Option<MemoryStats>,
    pub net_io: Option<NetIoStats>,
    pub disk_io: Option<DiskIoStats>,
}

impl DerivedMetrics {
    pub fn from_samples(
        latest: Option<&RawSample>,
        previous: Option<&RawSample>,
        settings: &MetricSettings,
    ) -> Self {
        let Some(current) = latest else {
            return Self::default();
        };

        Self {
            cpu: previous.and_then(|prev| cpu_stats(current, prev, settings.core_count_hint)),
            memory: memory_stats(current),
            net_io: net_io_stats(current, previous, &settings.interface),
            disk_io: disk_io_stats(current, previous),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.net_io.is_none() && self.disk_io.is_none()
    }
}

/// CPU usage between two samples.
///
/// usage % = container delta / host delta * cores * 100
pub fn cpu_stats(current: &RawSample, previous: &RawSample, core_count_hint: u64) -> Option<CpuStats> {
    let cpu = current.cpu.as_ref()?;
    let precpu = previous.cpu.as_ref()?;

    let system = cpu.system_usage?;
    let presystem = precpu.system_usage?;

    // Host counter going backwards or standing still: clock skew or a reset
    if system <= presystem {
        return None;
    }
    // Container counter going backwards: the container restarted
    let cpu_delta = cpu.total_usage.checked_sub(precpu.total_usage)?;
    let system_delta = system - presystem;

    let core_count = cpu
        .online_cpus
        .filter(|&n| n > 0)
        .or_else(|| {
            cpu.per_cpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u64)
                .filter(|&n| n > 0)
        })
        .unwrap_or(core_count_hint);

    let usage_percent = cpu_delta as f64 / system_delta as f64 * core_count as f64 * 100.0;

    Some(CpuStats {
        usage_percent,
        core_count,
    })
}

/// Memory is a point-in-time gauge; only the current sample matters
pub fn memory_stats(current: &RawSample) -> Option<MemoryStats> {
    let memory = current.memory.as_ref()?;

    Some(MemoryStats {
        usage_bytes: memory.usage?,
        limit_bytes: memory.limit?,
        cache_bytes: memory.cache,
        max_usage_bytes: memory.max_usage,
    })
}

pub fn net_io_stats(
    current: &RawSample,
    previous: Option<&RawSample>,
    interface: &InterfaceSelector,
) -> Option<NetIoStats> {
    let totals = interface_counters(current, interface)?;
    let paired = previous.and_then(|prev| paired_counters(current, prev, interface));
    let elapsed = previous.and_then(|prev| elapsed_seconds(current, prev));

    let (rx_rate_per_sec, tx_rate_per_sec) = match (paired, elapsed) {
        (Some((now, before)), Some(elapsed)) => (
            rate(now.rx_bytes, before.rx_bytes, elapsed),
            rate(now.tx_bytes, before.tx_bytes, elapsed),
        ),
        _ => (None, None),
    };

    Some(NetIoStats {
        total_rx: totals.rx_bytes,
        total_tx: totals.tx_bytes,
        rx_rate_per_sec,
        tx_rate_per_sec,
    })
}

pub fn disk_io_stats(current: &RawSample, previous: Option<&RawSample>) -> Option<DiskIoStats> {
    let (total_read, total_write) = block_io_totals(current)?;
    let before = previous.and_then(block_io_totals);
    let elapsed = previous.and_then(|prev| elapsed_seconds(current, prev));

    let (read_rate_per_sec, write_rate_per_sec) = match (before, elapsed) {
        (Some((read_before, write_before)), Some(elapsed)) => (
            rate(total_read, read_before, elapsed),
            rate(total_write, write_before, elapsed),
        ),
        _ => (None, None),
    };

    Some(DiskIoStats {
        total_read,
        total_write,
        read_rate_per_sec,
        write_rate_per_sec,
    })
}

fn interface_counters(sample: &RawSample, interface: &InterfaceSelector) -> Option<InterfaceCounters> {
    let networks = sample.networks.as_ref()?;

    match interface {
        InterfaceSelector::Named(name) => networks.get(name).copied(),
        InterfaceSelector::All if networks.is_empty() => None,
        InterfaceSelector::All => Some(networks.values().copied().fold(InterfaceCounters::default(), add)),
    }
}

/// Counters of the selected interfaces present in both samples, as (current, previous).
///
/// With `All`, an interface that appeared or went away between the two samples
/// is left out, so its whole cumulative counter never shows up as one interval.
fn paired_counters(
    current: &RawSample,
    previous: &RawSample,
    interface: &InterfaceSelector,
) -> Option<(InterfaceCounters, InterfaceCounters)> {
    match interface {
        InterfaceSelector::Named(_) => Some((
            interface_counters(current, interface)?,
            interface_counters(previous, interface)?,
        )),
        InterfaceSelector::All => {
            let now = current.networks.as_ref()?;
            let before = previous.networks.as_ref()?;

            now.iter()
                .filter_map(|(name, counters)| before.get(name).map(|prev| (*counters, *prev)))
                .fold(None, |acc, (counters, prev)| {
                    let (now_sum, before_sum) = acc.unwrap_or_default();
                    Some((add(now_sum, counters), add(before_sum, prev)))
                })
        }
    }
}

fn add(acc: InterfaceCounters, counters: InterfaceCounters) -> InterfaceCounters {
    InterfaceCounters {
        rx_bytes: acc.rx_bytes.saturating_add(counters.rx_bytes),
        tx_bytes: acc.tx_bytes.saturating_add(counters.tx_bytes),
    }
}

/// Sum of read- and write-tagged entries. `None` unless both tags are present.
fn block_io_totals(sample: &RawSample) -> Option<(u64, u64)> {
    let entries = sample.block_io.as_ref()?;

    let mut read = None::<u64>;
    let mut write = None::<u64>;
    for entry in entries {
        if entry.op.eq_ignore_ascii_case("read") {
            read = Some(read.unwrap_or(0).saturating_add(entry.value));
        } else if entry.op.eq_ignore_ascii_case("write") {
            write = Some(write.unwrap_or(0).saturating_add(entry.value));
        }
    }

    Some((read?, write?))
}

fn elapsed_seconds(current: &RawSample, previous: &RawSample) -> Option<f64> {
    let micros = (current.read_at - previous.read_at).num_microseconds()?;
    (micros > 0).then(|| micros as f64 / 1_000_000.0)
}

fn rate(now: u64, before: u64, elapsed_secs: f64) -> Option<f64> {
    now.checked_sub(before).map(|delta| delta as f64 / elapsed_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sample::{BlockIoEntry, CpuCounters, MemoryCounters};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn cpu_sample(secs: i64, total: u64, system: u64, online: Option<u64>) -> RawSample {
        RawSample {
            read_at: at(secs),
            cpu: Some(CpuCounters {
                total_usage: total,
                system_usage: Some(system),
                online_cpus: online,
                per_cpu_usage: None,
            }),
            ..Default::default()
        }
    }

    fn net_sample(secs: i64, interfaces: &[(&str, u64, u64)]) -> RawSample {
        let networks = interfaces
            .iter()
            .map(|(name, rx, tx)| {
                (
                    name.to_string(),
                    InterfaceCounters {
                        rx_bytes: *rx,
                        tx_bytes: *tx,
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        RawSample {
            read_at: at(secs),
            networks: Some(networks),
            ..Default::default()
        }
    }

    fn disk_sample(secs: i64, entries: &[(&str, u64)]) -> RawSample {
        RawSample {
            read_at: at(secs),
            block_io: Some(
                entries
                    .iter()
                    .map(|(op, value)| BlockIoEntry {
                        op: op.to_string(),
                        value: *value,
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_usage_with_online_cores() {
        let s1 = cpu_sample(0, 1000, 500_000, Some(4));
        let s2 = cpu_sample(1, 1200, 500_500, Some(4));

        let cpu = cpu_stats(&s2, &s1, 1).unwrap();
        assert!((cpu.usage_percent - 160.0).abs() < 1e-9);
        assert_eq!(cpu.core_count, 4);
    }

    #[test]
    fn test_cpu_absent_when_system_delta_not_positive() {
        let s1 = cpu_sample(0, 1000, 500_000, Some(4));
        let same = cpu_sample(1, 1200, 500_000, Some(4));
        let behind = cpu_sample(2, 1400, 499_000, Some(4));

        assert!(cpu_stats(&same, &s1, 4).is_none());
        assert!(cpu_stats(&behind, &s1, 4).is_none());
    }

    #[test]
    fn test_cpu_absent_when_container_counter_reset() {
        let s1 = cpu_sample(0, 5000, 500_000, Some(2));
        let s2 = cpu_sample(1, 100, 501_000, Some(2));
        assert!(cpu_stats(&s2, &s1, 2).is_none());
    }

    #[test]
    fn test_cpu_absent_without_system_counter() {
        let s1 = cpu_sample(0, 1000, 500_000, Some(4));
        let mut s2 = cpu_sample(1, 1200, 500_500, Some(4));
        s2.cpu.as_mut().unwrap().system_usage = None;
        assert!(cpu_stats(&s2, &s1, 4).is_none());

        let no_cpu = RawSample {
            read_at: at(2),
            ..Default::default()
        };
        assert!(cpu_stats(&no_cpu, &s1, 4).is_none());
    }

    #[test]
    fn test_core_count_precedence() {
        let s1 = cpu_sample(0, 0, 0, None);

        let mut per_core = cpu_sample(1, 100, 1000, None);
        per_core.cpu.as_mut().unwrap().per_cpu_usage = Some(vec![10, 20, 30]);
        assert_eq!(cpu_stats(&per_core, &s1, 8).unwrap().core_count, 3);

        // Online count wins over the per-core list
        per_core.cpu.as_mut().unwrap().online_cpus = Some(2);
        assert_eq!(cpu_stats(&per_core, &s1, 8).unwrap().core_count, 2);

        // Neither reported: fall back to the hint
        let bare = cpu_sample(1, 100, 1000, None);
        let cpu = cpu_stats(&bare, &s1, 8).unwrap();
        assert_eq!(cpu.core_count, 8);
        assert!((cpu.usage_percent - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_memory_requires_usage_and_limit() {
        let mut sample = RawSample {
            memory: Some(MemoryCounters {
                usage: Some(100),
                limit: Some(1000),
                cache: None,
                max_usage: Some(200),
            }),
            ..Default::default()
        };

        let memory = memory_stats(&sample).unwrap();
        assert_eq!(memory.usage_bytes, 100);
        assert_eq!(memory.limit_bytes, 1000);
        assert_eq!(memory.cache_bytes, None);
        assert_eq!(memory.max_usage_bytes, Some(200));

        sample.memory.as_mut().unwrap().limit = None;
        assert!(memory_stats(&sample).is_none());
    }

    #[test]
    fn test_net_rate_per_second() {
        let s1 = net_sample(0, &[("eth0", 2000, 100)]);
        let s2 = net_sample(1, &[("eth0", 2500, 400)]);

        let net = net_io_stats(&s2, Some(&s1), &InterfaceSelector::default()).unwrap();
        assert_eq!(net.total_rx, 2500);
        assert_eq!(net.total_tx, 400);
        assert!((net.rx_rate_per_sec.unwrap() - 500.0).abs() < 1e-9);
        assert!((net.tx_rate_per_sec.unwrap() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_net_totals_without_previous_have_no_rate() {
        let s1 = net_sample(0, &[("eth0", 2000, 100)]);
        let net = net_io_stats(&s1, None, &InterfaceSelector::default()).unwrap();
        assert_eq!(net.total_rx, 2000);
        assert_eq!(net.rx_rate_per_sec, None);
        assert_eq!(net.tx_rate_per_sec, None);
    }

    #[test]
    fn test_net_missing_interface_is_absent_and_not_used_as_previous() {
        let eth0 = InterfaceSelector::default();
        let s1 = net_sample(0, &[("eth0", 1000, 10)]);
        let s2 = net_sample(1, &[("eth1", 5000, 50)]);
        let s3 = net_sample(2, &[("eth0", 3000, 30)]);

        assert!(net_io_stats(&s2, Some(&s1), &eth0).is_none());

        // s3 follows s2, which has no eth0 counters: totals but no rate
        let net = net_io_stats(&s3, Some(&s2), &eth0).unwrap();
        assert_eq!(net.total_rx, 3000);
        assert_eq!(net.rx_rate_per_sec, None);
    }

    #[test]
    fn test_net_counter_reset_gives_no_rate() {
        let s1 = net_sample(0, &[("eth0", 9000, 900)]);
        let s2 = net_sample(1, &[("eth0", 100, 1000)]);

        let net = net_io_stats(&s2, Some(&s1), &InterfaceSelector::default()).unwrap();
        assert_eq!(net.rx_rate_per_sec, None);
        assert!((net.tx_rate_per_sec.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_net_zero_elapsed_gives_no_rate() {
        let s1 = net_sample(5, &[("eth0", 1000, 10)]);
        let s2 = net_sample(5, &[("eth0", 2000, 20)]);
        let earlier = net_sample(3, &[("eth0", 3000, 30)]);

        let eth0 = InterfaceSelector::default();
        assert_eq!(net_io_stats(&s2, Some(&s1), &eth0).unwrap().rx_rate_per_sec, None);
        assert_eq!(net_io_stats(&earlier, Some(&s1), &eth0).unwrap().rx_rate_per_sec, None);
    }

    #[test]
    fn test_net_all_interfaces_summed() {
        let s1 = net_sample(0, &[("eth0", 100, 10), ("eth1", 200, 20)]);
        let s2 = net_sample(2, &[("eth0", 300, 10), ("eth1", 400, 60)]);

        let net = net_io_stats(&s2, Some(&s1), &InterfaceSelector::All).unwrap();
        assert_eq!(net.total_rx, 700);
        assert_eq!(net.total_tx, 70);
        assert!((net.rx_rate_per_sec.unwrap() - 200.0).abs() < 1e-9);
        assert!((net.tx_rate_per_sec.unwrap() - 20.0).abs() < 1e-9);

        let empty = net_sample(3, &[]);
        assert!(net_io_stats(&empty, None, &InterfaceSelector::All).is_none());
    }

    #[test]
    fn test_disk_sums_tagged_entries() {
        let s1 = disk_sample(0, &[("Read", 100), ("Write", 50), ("read", 100), ("Total", 250)]);
        let s2 = disk_sample(2, &[("Read", 300), ("Write", 450), ("read", 300), ("Total", 1050)]);

        let disk = disk_io_stats(&s2, Some(&s1)).unwrap();
        assert_eq!(disk.total_read, 600);
        assert_eq!(disk.total_write, 450);
        assert!((disk.read_rate_per_sec.unwrap() - 200.0).abs() < 1e-9);
        assert!((disk.write_rate_per_sec.unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_disk_absent_without_tagged_entries() {
        assert!(disk_io_stats(&disk_sample(0, &[]), None).is_none());
        assert!(disk_io_stats(&disk_sample(0, &[("Sync", 10)]), None).is_none());

        let untracked = RawSample::default();
        assert!(disk_io_stats(&untracked, None).is_none());
    }

    #[test]
    fn test_net_all_interfaces_rate_skips_changed_set() {
        let all = InterfaceSelector::All;

        // eth1 shows up with a large cumulative counter
        let s1 = net_sample(0, &[("eth0", 100, 10)]);
        let s2 = net_sample(2, &[("eth0", 300, 10), ("eth1", 50_000, 5_000)]);
        let net = net_io_stats(&s2, Some(&s1), &all).unwrap();
        assert_eq!(net.total_rx, 50_300);
        assert_eq!(net.total_tx, 5_010);
        assert!((net.rx_rate_per_sec.unwrap() - 100.0).abs() < 1e-9);
        assert!((net.tx_rate_per_sec.unwrap() - 0.0).abs() < 1e-9);

        // eth1 goes away again: not a counter reset on the sum
        let s3 = net_sample(3, &[("eth0", 400, 20)]);
        let net = net_io_stats(&s3, Some(&s2), &all).unwrap();
        assert_eq!(net.total_rx, 400);
        assert!((net.rx_rate_per_sec.unwrap() - 100.0).abs() < 1e-9);

        // Nothing in common
        let s4 = net_sample(4, &[("eth2", 7_000, 70)]);
        let net = net_io_stats(&s4, Some(&s3), &all).unwrap();
        assert_eq!(net.total_rx, 7_000);
        assert_eq!(net.rx_rate_per_sec, None);
        assert_eq!(net.tx_rate_per_sec, None);
    }

    #[test]
    fn test_disk_absent_with_only_one_tag() {
        let reads_only_before = disk_sample(0, &[("Read", 100)]);
        let reads_only = disk_sample(1, &[("Read", 300)]);
        assert!(disk_io_stats(&reads_only, Some(&reads_only_before)).is_none());

        let writes_only = disk_sample(1, &[("Write", 300), ("Total", 300)]);
        assert!(disk_io_stats(&writes_only, None).is_none());

        // A previous sample missing one tag yields totals but no rates
        let both = disk_sample(1, &[("Read", 300), ("Write", 40)]);
        let disk = disk_io_stats(&both, Some(&reads_only_before)).unwrap();
        assert_eq!(disk.total_read, 300);
        assert_eq!(disk.total_write, 40);
        assert_eq!(disk.read_rate_per_sec, None);
        assert_eq!(disk.write_rate_per_sec, None);
    }

    #[test]
    fn test_derived_metrics_before_first_sample() {
        let metrics = DerivedMetrics::from_samples(None, None, &MetricSettings::default());
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_interface_selector_parse() {
        assert_eq!(InterfaceSelector::parse("*"), InterfaceSelector::All);
        assert_eq!(InterfaceSelector::parse(" eth1 "), InterfaceSelector::Named("eth1".into()));
    }
}
