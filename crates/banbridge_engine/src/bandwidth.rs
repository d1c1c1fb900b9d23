//! Network throughput sampling.
//!
//! A [`BandwidthMeter`] reports rx/tx throughput since its previous sample.
//! The meter is chosen once at startup: `/proc/net/dev` on Linux, the
//! operating system's interface counters elsewhere. Where neither is
//! available throughput is reported as absent.

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::Networks;
use tracing::debug;

/// Kernel interface statistics on Linux.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// Minimum window between samples used for rate computation.
const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Name fragments of loopback, virtual and tunnel adapters.
const VIRTUAL_INTERFACE_MARKERS: &[&str] = &[
    "loopback",
    "docker",
    "veth",
    "vmware",
    "virtualbox",
    "hyper-v",
    "vmswitch",
    "tunnel",
    "isatap",
    "teredo",
    "wireguard",
    "tailscale",
    "hamachi",
    "npcap",
];

/// Throughput in kbit/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthSample {
    /// Received.
    pub rx_kbps: f64,
    /// Sent.
    pub tx_kbps: f64,
}

impl BandwidthSample {
    /// A zero sample.
    pub const ZERO: BandwidthSample = BandwidthSample {
        rx_kbps: 0.0,
        tx_kbps: 0.0,
    };
}

/// Source of throughput samples.
pub trait BandwidthMeter: Send + Sync {
    /// Returns throughput since the previous call, or `None` if the
    /// counters cannot be read right now.
    fn sample(&self) -> Option<BandwidthSample>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Selects the meter for this platform, if any.
pub fn select_meter(preferred_interface: Option<&str>) -> Option<Box<dyn BandwidthMeter>> {
    if cfg!(target_os = "linux") && Path::new(PROC_NET_DEV).exists() {
        return Some(Box::new(LinuxBandwidthMeter::new(preferred_interface)));
    }
    if sysinfo::IS_SUPPORTED_SYSTEM {
        return Some(Box::new(SystemBandwidthMeter::new()));
    }
    None
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    at: Instant,
    rx_bytes: u64,
    tx_bytes: u64,
}

/// Turns cumulative byte counters into rates.
///
/// The first reading and any reading after a counter reset yield
/// [`BandwidthSample::ZERO`].
#[derive(Debug, Default)]
struct RateTracker {
    previous: Mutex<Option<Counters>>,
}

impl RateTracker {
    fn update(&self, rx_bytes: u64, tx_bytes: u64, now: Instant) -> BandwidthSample {
        let current = Counters {
            at: now,
            rx_bytes,
            tx_bytes,
        };

        let previous = self.previous.lock().replace(current);
        let Some(previous) = previous else {
            return BandwidthSample::ZERO;
        };

        let (Some(d_rx), Some(d_tx)) = (
            rx_bytes.checked_sub(previous.rx_bytes),
            tx_bytes.checked_sub(previous.tx_bytes),
        ) else {
            debug!("interface counters went backwards");
            return BandwidthSample::ZERO;
        };

        let seconds = now
            .saturating_duration_since(previous.at)
            .max(MIN_WINDOW)
            .as_secs_f64();
        BandwidthSample {
            rx_kbps: d_rx as f64 / seconds * 8.0 / 1000.0,
            tx_kbps: d_tx as f64 / seconds * 8.0 / 1000.0,
        }
    }
}

/// Meter backed by `/proc/net/dev`.
///
/// Reads the configured interface, or the first non-loopback interface when
/// none is configured or the configured one is missing. The first sample and
/// any sample following a counter reset are `0.0/0.0`.
#[derive(Debug)]
pub struct LinuxBandwidthMeter {
    source: PathBuf,
    preferred: Option<String>,
    rates: RateTracker,
}

impl LinuxBandwidthMeter {
    /// Creates a meter reading [`PROC_NET_DEV`].
    pub fn new(preferred_interface: Option<&str>) -> Self {
        Self::with_source(PROC_NET_DEV, preferred_interface)
    }

    /// Creates a meter reading an arbitrary file in `/proc/net/dev` format.
    pub fn with_source(source: impl Into<PathBuf>, preferred_interface: Option<&str>) -> Self {
        Self {
            source: source.into(),
            preferred: preferred_interface
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .map(str::to_string),
            rates: RateTracker::default(),
        }
    }

    fn sample_at(&self, contents: &str, now: Instant) -> Option<BandwidthSample> {
        let (rx_bytes, tx_bytes) = parse_proc_net_dev(contents, self.preferred.as_deref())?;
        Some(self.rates.update(rx_bytes, tx_bytes, now))
    }
}

impl BandwidthMeter for LinuxBandwidthMeter {
    fn sample(&self) -> Option<BandwidthSample> {
        let contents = match fs::read_to_string(&self.source) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %self.source.display(), error = %e, "cannot read interface counters");
                return None;
            }
        };
        self.sample_at(&contents, Instant::now())
    }

    fn name(&self) -> &'static str {
        "linux-proc-net-dev"
    }
}

/// Cross-platform meter over the operating system's interface counters.
///
/// Sums every physical interface; loopback and virtual adapters are skipped
/// unless nothing else exists.
pub struct SystemBandwidthMeter {
    networks: Mutex<Networks>,
    rates: RateTracker,
}

impl SystemBandwidthMeter {
    /// Creates a meter and reads the current interface list.
    pub fn new() -> Self {
        Self {
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            rates: RateTracker::default(),
        }
    }
}

impl Default for SystemBandwidthMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthMeter for SystemBandwidthMeter {
    fn sample(&self) -> Option<BandwidthSample> {
        let totals = {
            let mut networks = self.networks.lock();
            networks.refresh_list();
            networks.refresh();
            sum_interfaces(networks.iter().map(|(name, data)| {
                (
                    name.as_str(),
                    data.total_received(),
                    data.total_transmitted(),
                )
            }))
        };
        let Some((rx_bytes, tx_bytes)) = totals else {
            debug!("no network interfaces reported");
            return None;
        };
        Some(self.rates.update(rx_bytes, tx_bytes, Instant::now()))
    }

    fn name(&self) -> &'static str {
        "system-interfaces"
    }
}

/// Returns true for loopback, container, hypervisor and VPN adapters.
pub fn is_virtual_interface(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    name.is_empty()
        || name == "lo"
        || name.starts_with("lo ")
        || name.starts_with("br-")
        || VIRTUAL_INTERFACE_MARKERS.iter().any(|m| name.contains(m))
}

/// Sums `(name, rx_bytes, tx_bytes)` over physical interfaces, or over every
/// interface when no physical one is present. `None` if the list is empty.
pub fn sum_interfaces<'a>(
    interfaces: impl IntoIterator<Item = (&'a str, u64, u64)>,
) -> Option<(u64, u64)> {
    let mut physical: Option<(u64, u64)> = None;
    let mut all: Option<(u64, u64)> = None;

    for (name, rx, tx) in interfaces {
        let add = |acc: Option<(u64, u64)>| {
            let (r, t) = acc.unwrap_or((0, 0));
            Some((r.saturating_add(rx), t.saturating_add(tx)))
        };
        all = add(all);
        if !is_virtual_interface(name) {
            physical = add(physical);
        }
    }

    physical.or(all)
}

/// Extracts `(rx_bytes, tx_bytes)` for one interface.
///
/// Loopback is skipped. If `preferred` is set but not present, the first
/// usable interface is used instead.
pub fn parse_proc_net_dev(contents: &str, preferred: Option<&str>) -> Option<(u64, u64)> {
    let mut fallback = None;

    for line in contents.lines() {
        let Some((iface, stats)) = line.split_once(':') else {
            continue;
        };
        let iface = iface.trim();
        if iface == "lo" {
            continue;
        }

        let cols: Vec<&str> = stats.split_whitespace().collect();
        if cols.len() < 16 {
            continue;
        }
        let (Ok(rx), Ok(tx)) = (cols[0].parse::<u64>(), cols[8].parse::<u64>()) else {
            continue;
        };

        match preferred {
            Some(name) if name == iface => return Some((rx, tx)),
            Some(_) => {
                fallback.get_or_insert((rx, tx));
            }
            None => return Some((rx, tx)),
        }
    }

    fallback
}
