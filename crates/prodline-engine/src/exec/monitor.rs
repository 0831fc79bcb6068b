//! Resource sampling for monitored children, read from `/proc`.
//!
//! Rates (disk, network, CPU) are derived from deltas between
//! consecutive samples; the first sample reports absolute values only.

use std::time::{Duration, Instant};

use prodline_types::result::ResourceSample;

/// Default cadence for the sampler task.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Cumulative counters captured at one instant.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    cpu_ticks: u64,
    disk_read_bytes: u64,
    disk_write_bytes: u64,
    net_sent_bytes: u64,
    net_recv_bytes: u64,
}

/// Per-process sampler. Network counters are system-wide, matching the
/// advisory nature of the monitor.
pub struct ResourceMonitor {
    pid: u32,
    ticks_per_sec: f64,
    prev: Option<(Instant, Counters)>,
}

impl ResourceMonitor {
    pub fn new(pid: u32) -> Self {
        // USER_HZ; effectively always 100 on Linux but ask anyway.
        let ticks = unsafe { nix::libc::sysconf(nix::libc::_SC_CLK_TCK) };
        let ticks_per_sec = if ticks > 0 { ticks as f64 } else { 100.0 };
        Self {
            pid,
            ticks_per_sec,
            prev: None,
        }
    }

    /// Take one sample. Returns `None` once the process is gone.
    pub fn sample(&mut self) -> Option<ResourceSample> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", self.pid)).ok()?;
        let cpu_ticks = parse_stat_ticks(&stat)?;
        let memory_mb = std::fs::read_to_string(format!("/proc/{}/status", self.pid))
            .ok()
            .and_then(|s| parse_vmrss_kb(&s))
            .map(|kb| kb as f64 / 1024.0)
            .unwrap_or(0.0);
        let (disk_read_bytes, disk_write_bytes) =
            std::fs::read_to_string(format!("/proc/{}/io", self.pid))
                .ok()
                .and_then(|s| parse_io_bytes(&s))
                .unwrap_or((0, 0));
        let (net_recv_bytes, net_sent_bytes) = std::fs::read_to_string("/proc/net/dev")
            .ok()
            .and_then(|s| parse_net_dev_bytes(&s))
            .unwrap_or((0, 0));

        let now = Instant::now();
        let counters = Counters {
            cpu_ticks,
            disk_read_bytes,
            disk_write_bytes,
            net_sent_bytes,
            net_recv_bytes,
        };

        let mut sample = ResourceSample {
            memory_mb,
            ..ResourceSample::default()
        };

        if let Some((prev_at, prev)) = self.prev {
            let elapsed = now.duration_since(prev_at).as_secs_f64();
            if elapsed > 0.0 {
                let cpu_secs =
                    cpu_ticks.saturating_sub(prev.cpu_ticks) as f64 / self.ticks_per_sec;
                sample.cpu_percent = cpu_secs / elapsed * 100.0;
                sample.disk_read_mb_s = rate_mb_s(disk_read_bytes, prev.disk_read_bytes, elapsed);
                sample.disk_write_mb_s =
                    rate_mb_s(disk_write_bytes, prev.disk_write_bytes, elapsed);
                sample.net_sent_mb_s = rate_mb_s(net_sent_bytes, prev.net_sent_bytes, elapsed);
                sample.net_recv_mb_s = rate_mb_s(net_recv_bytes, prev.net_recv_bytes, elapsed);
            }
        }
        self.prev = Some((now, counters));
        Some(sample)
    }
}

fn rate_mb_s(current: u64, previous: u64, elapsed_secs: f64) -> f64 {
    current.saturating_sub(previous) as f64 / BYTES_PER_MB / elapsed_secs
}

/// utime + stime from `/proc/<pid>/stat`. The comm field may contain
/// spaces, so fields are counted from the closing paren.
fn parse_stat_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // After comm: state is field 0, utime is field 11, stime field 12.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

fn parse_vmrss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// `read_bytes` / `write_bytes` from `/proc/<pid>/io`.
fn parse_io_bytes(io: &str) -> Option<(u64, u64)> {
    let mut read = None;
    let mut write = None;
    for line in io.lines() {
        if let Some(v) = line.strip_prefix("read_bytes: ") {
            read = v.trim().parse().ok();
        } else if let Some(v) = line.strip_prefix("write_bytes: ") {
            write = v.trim().parse().ok();
        }
    }
    Some((read?, write?))
}

/// Sum of (recv, sent) bytes over all interfaces except loopback.
fn parse_net_dev_bytes(dev: &str) -> Option<(u64, u64)> {
    let mut recv = 0u64;
    let mut sent = 0u64;
    for line in dev.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        recv += fields.first()?.parse::<u64>().ok()?;
        sent += fields.get(8)?.parse::<u64>().ok()?;
    }
    Some((recv, sent))
}
