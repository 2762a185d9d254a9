//! Remote interface counter sampling and rate derivation.
//!
//! Reads the kernel's per-interface counter table (`/proc/net/dev`) on the
//! remote host twice, a fixed interval apart, and turns the deltas into
//! per-interface and aggregate byte rates.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::sleep;

use crate::ssh::SshSession;

/// Interface name prefixes excluded from sampling (loopback, containers,
/// bridges, tunnels).
pub const SKIP_PREFIXES: &[&str] = &["lo", "docker", "br-", "veth", "virbr", "tun", "tap"];

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time counters for one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// All physical interfaces at one instant.
pub type InterfaceSnapshot = HashMap<String, InterfaceCounters>;

/// Derived per-interface rates over one sampling pair.
#[derive(Debug, Clone)]
pub struct InterfaceRate {
    pub name: String,
    pub download_bps: f64,
    pub upload_bps: f64,
    pub total_rx_gb: f64,
    pub total_tx_gb: f64,
    pub active: bool,
}

/// Aggregate view of one sampling cycle.
#[derive(Debug, Clone)]
pub struct BandwidthSample {
    pub interfaces: HashMap<String, InterfaceRate>,
    /// Highest-traffic active interface, if any interface saw traffic.
    pub main_interface: Option<String>,
    pub total_download_bps: f64,
    pub total_upload_bps: f64,
    pub interface_count: usize,
    pub active_count: usize,
}

impl BandwidthSample {
    /// Interfaces that saw traffic during the interval.
    pub fn active_interfaces(&self) -> impl Iterator<Item = &InterfaceRate> {
        self.interfaces.values().filter(|r| r.active)
    }
}

/// Parse the `/proc/net/dev` table format. Skips the two header lines,
/// the virtual-interface skip-list, and any line that fails to parse.
pub fn parse_proc_net_dev(output: &str) -> InterfaceSnapshot {
    let mut stats = InterfaceSnapshot::new();

    for line in output.lines().skip(2) {
        let Some((name_part, data_part)) = line.split_once(':') else {
            continue;
        };
        let name = name_part.trim();
        if SKIP_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }

        let fields: Vec<&str> = data_part.split_whitespace().collect();
        if fields.len() < 16 {
            continue;
        }

        let parsed = (
            fields[0].parse::<u64>(),
            fields[1].parse::<u64>(),
            fields[8].parse::<u64>(),
            fields[9].parse::<u64>(),
        );
        if let (Ok(rx_bytes), Ok(rx_packets), Ok(tx_bytes), Ok(tx_packets)) = parsed {
            stats.insert(
                name.to_string(),
                InterfaceCounters {
                    rx_bytes,
                    tx_bytes,
                    rx_packets,
                    tx_packets,
                },
            );
        }
    }

    stats
}

/// Derive rates for every interface present in both snapshots.
/// Counter regressions (reset, sampling race) clamp to zero rather than
/// producing negative rates. Returns `None` when the intersection is empty.
pub fn rates_between(
    first: &InterfaceSnapshot,
    second: &InterfaceSnapshot,
    interval: Duration,
) -> Option<BandwidthSample> {
    let secs = interval.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }

    let mut interfaces = HashMap::new();
    let mut total_download = 0.0f64;
    let mut total_upload = 0.0f64;

    for (name, before) in first {
        let Some(after) = second.get(name) else {
            continue;
        };

        let download_bps = after.rx_bytes.saturating_sub(before.rx_bytes) as f64 / secs;
        let upload_bps = after.tx_bytes.saturating_sub(before.tx_bytes) as f64 / secs;

        total_download += download_bps;
        total_upload += upload_bps;

        interfaces.insert(
            name.clone(),
            InterfaceRate {
                name: name.clone(),
                download_bps,
                upload_bps,
                total_rx_gb: after.rx_bytes as f64 / GIB,
                total_tx_gb: after.tx_bytes as f64 / GIB,
                active: download_bps > 0.0 || upload_bps > 0.0,
            },
        );
    }

    if interfaces.is_empty() {
        return None;
    }

    let main_interface = interfaces
        .values()
        .filter(|r| r.active)
        .max_by(|a, b| {
            (a.download_bps + a.upload_bps).total_cmp(&(b.download_bps + b.upload_bps))
        })
        .map(|r| r.name.clone());

    let interface_count = interfaces.len();
    let active_count = interfaces.values().filter(|r| r.active).count();

    Some(BandwidthSample {
        interfaces,
        main_interface,
        total_download_bps: total_download,
        total_upload_bps: total_upload,
        interface_count,
        active_count,
    })
}

/// Samples remote interface counters over an `SshSession`.
#[derive(Debug, Clone)]
pub struct InterfaceSampler {
    session: SshSession,
}

impl InterfaceSampler {
    pub fn new(session: SshSession) -> Self {
        Self { session }
    }

    /// One point-in-time snapshot. `None` when the remote command fails.
    pub async fn snapshot(&self) -> Option<InterfaceSnapshot> {
        let out = self.session.run("cat /proc/net/dev").await;
        if !out.success || out.stdout.is_empty() {
            return None;
        }
        Some(parse_proc_net_dev(&out.stdout))
    }

    /// Two snapshots `interval` apart, reduced to rates.
    /// `None` when either snapshot fails or no interface appears in both.
    pub async fn sample(&self, interval: Duration) -> Option<BandwidthSample> {
        let first = self.snapshot().await?;
        sleep(interval).await;
        let second = self.snapshot().await?;
        rates_between(&first, &second, interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  100000     500    0    0    0     0          0         0   100000     500    0    0    0     0       0          0
  eth0: 1000000    2000    0    0    0     0          0         0   500000    1000    0    0    0     0       0          0
docker0:  123456     100    0    0    0     0          0         0    65432      50    0    0    0     0       0          0
veth1234:   1111      11    0    0    0     0          0         0     2222      22    0    0    0     0       0          0
  eth1: garbage     bad    0    0    0     0          0         0   500000    1000    0    0    0     0       0          0
";

    fn counters(rx: u64, tx: u64) -> InterfaceCounters {
        InterfaceCounters {
            rx_bytes: rx,
            tx_bytes: tx,
            rx_packets: 0,
            tx_packets: 0,
        }
    }

    #[test]
    fn test_parse_skips_virtual_interfaces() {
        let snap = parse_proc_net_dev(PROC_NET_DEV);
        assert!(snap.contains_key("eth0"));
        assert!(!snap.contains_key("lo"));
        assert!(!snap.contains_key("docker0"));
        assert!(!snap.contains_key("veth1234"));
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let snap = parse_proc_net_dev(PROC_NET_DEV);
        // eth1 has a non-numeric rx_bytes field; the line is dropped,
        // not the whole snapshot
        assert!(!snap.contains_key("eth1"));
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_parse_field_positions() {
        let snap = parse_proc_net_dev(PROC_NET_DEV);
        let eth0 = &snap["eth0"];
        assert_eq!(eth0.rx_bytes, 1_000_000);
        assert_eq!(eth0.rx_packets, 2_000);
        assert_eq!(eth0.tx_bytes, 500_000);
        assert_eq!(eth0.tx_packets, 1_000);
    }

    #[test]
    fn test_rates_worked_example() {
        // eth0: rx 1000 -> 6000, tx 500 -> 1500 over 1s
        let mut first = InterfaceSnapshot::new();
        first.insert("eth0".to_string(), counters(1000, 500));
        let mut second = InterfaceSnapshot::new();
        second.insert("eth0".to_string(), counters(6000, 1500));

        let sample = rates_between(&first, &second, Duration::from_secs(1)).unwrap();
        let eth0 = &sample.interfaces["eth0"];
        assert_eq!(eth0.download_bps, 5000.0);
        assert_eq!(eth0.upload_bps, 1000.0);
        assert!(eth0.active);
        assert_eq!(sample.total_download_bps, 5000.0);
        assert_eq!(sample.total_upload_bps, 1000.0);
        assert_eq!(sample.main_interface.as_deref(), Some("eth0"));
        assert_eq!(sample.interface_count, 1);
        assert_eq!(sample.active_count, 1);
    }

    #[test]
    fn test_counter_reset_clamps_to_zero() {
        let mut first = InterfaceSnapshot::new();
        first.insert("eth0".to_string(), counters(1_000_000, 500_000));
        let mut second = InterfaceSnapshot::new();
        second.insert("eth0".to_string(), counters(100, 50));

        let sample = rates_between(&first, &second, Duration::from_secs(1)).unwrap();
        let eth0 = &sample.interfaces["eth0"];
        assert_eq!(eth0.download_bps, 0.0);
        assert_eq!(eth0.upload_bps, 0.0);
        assert!(!eth0.active);
        assert!(sample.main_interface.is_none());
        assert_eq!(sample.active_count, 0);
    }

    #[test]
    fn test_main_interface_is_argmax_over_active() {
        let mut first = InterfaceSnapshot::new();
        first.insert("eth0".to_string(), counters(0, 0));
        first.insert("eth1".to_string(), counters(0, 0));
        first.insert("eth2".to_string(), counters(0, 0));
        let mut second = InterfaceSnapshot::new();
        second.insert("eth0".to_string(), counters(100, 100));
        second.insert("eth1".to_string(), counters(5000, 5000));
        second.insert("eth2".to_string(), counters(0, 0));

        let sample = rates_between(&first, &second, Duration::from_secs(1)).unwrap();
        assert_eq!(sample.main_interface.as_deref(), Some("eth1"));
        assert_eq!(sample.interface_count, 3);
        assert_eq!(sample.active_count, 2);
        // totals sum over all interfaces, not just active ones
        assert_eq!(sample.total_download_bps, 5100.0);
    }

    #[test]
    fn test_empty_intersection_yields_none() {
        let mut first = InterfaceSnapshot::new();
        first.insert("eth0".to_string(), counters(0, 0));
        let mut second = InterfaceSnapshot::new();
        second.insert("eth1".to_string(), counters(0, 0));
        assert!(rates_between(&first, &second, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_cumulative_totals_in_gb() {
        let mut first = InterfaceSnapshot::new();
        first.insert("eth0".to_string(), counters(0, 0));
        let mut second = InterfaceSnapshot::new();
        second.insert(
            "eth0".to_string(),
            counters(2 * 1024 * 1024 * 1024, 1024 * 1024 * 1024),
        );

        let sample = rates_between(&first, &second, Duration::from_secs(1)).unwrap();
        let eth0 = &sample.interfaces["eth0"];
        assert!((eth0.total_rx_gb - 2.0).abs() < 1e-9);
        assert!((eth0.total_tx_gb - 1.0).abs() < 1e-9);
    }
}
