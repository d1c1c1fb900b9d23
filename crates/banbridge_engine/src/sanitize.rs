//! Rules that turn raw host observations into values safe to transmit.
//!
//! Anything that cannot be measured becomes `None`; a negative sentinel is
//! never sent.

use banbridge_protocol::ServerMetricsRequest;

const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Largest megabyte value sent; the backend stores it as a signed 32-bit int.
pub const MAX_MEGABYTES: u32 = i32::MAX as u32;

/// Upper bound for CPU load, allowing momentary overshoot above 1.0.
pub const MAX_CPU_LOAD: f64 = 1.2;

/// Upper bound for ticks per second.
pub const MAX_TPS: f64 = 25.0;

/// Upper bound for throughput, in kbit/s (100 Gbit/s).
pub const MAX_KBPS: f64 = 100_000_000.0;

/// Raw observations collected from the host and the throughput meter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawMetrics {
    /// Memory in use, in bytes.
    pub used_memory_bytes: i64,
    /// Memory limit, in bytes.
    pub max_memory_bytes: i64,
    /// System CPU load in `0.0..=1.0`.
    pub cpu_load: Option<f64>,
    /// Connected players.
    pub players_online: usize,
    /// Configured capacity; negative when the host does not know.
    pub players_max: i64,
    /// Ticks per second.
    pub tps: Option<f64>,
    /// Received throughput, kbit/s.
    pub rx_kbps: Option<f64>,
    /// Sent throughput, kbit/s.
    pub tx_kbps: Option<f64>,
}

/// Builds the metrics body from raw observations.
pub fn metrics_request(server_key: &str, raw: &RawMetrics) -> ServerMetricsRequest {
    ServerMetricsRequest {
        server_key: server_key.trim().to_string(),
        ram_used_mb: used_megabytes(raw.used_memory_bytes),
        ram_max_mb: max_megabytes(raw.max_memory_bytes),
        cpu_load: raw.cpu_load.and_then(cpu_load),
        players_online: players_online(raw.players_online),
        players_max: players_max(raw.players_max),
        tps: raw.tps.and_then(tps),
        rx_kbps: throughput(raw.rx_kbps),
        tx_kbps: throughput(raw.tx_kbps),
    }
}

/// Used memory in whole MiB. Negative input is absent; zero is zero.
pub fn used_megabytes(bytes: i64) -> Option<u32> {
    if bytes < 0 {
        return None;
    }
    Some(saturate_megabytes(bytes / BYTES_PER_MIB))
}

/// Memory limit in whole MiB. Anything below one MiB is absent.
pub fn max_megabytes(bytes: i64) -> Option<u32> {
    if bytes <= 0 {
        return None;
    }
    let mb = bytes / BYTES_PER_MIB;
    (mb > 0).then(|| saturate_megabytes(mb))
}

fn saturate_megabytes(mb: i64) -> u32 {
    u32::try_from(mb).map_or(MAX_MEGABYTES, |mb| mb.min(MAX_MEGABYTES))
}

/// CPU load clamped to [`MAX_CPU_LOAD`].
pub fn cpu_load(value: f64) -> Option<f64> {
    measurable(value).map(|v| v.min(MAX_CPU_LOAD))
}

/// Ticks per second clamped to [`MAX_TPS`].
pub fn tps(value: f64) -> Option<f64> {
    measurable(value).map(|v| v.min(MAX_TPS))
}

/// Throughput clamped to [`MAX_KBPS`] and rounded to two decimals.
pub fn throughput(value: Option<f64>) -> Option<f64> {
    value
        .and_then(measurable)
        .map(|v| (v.min(MAX_KBPS) * 100.0).round() / 100.0)
}

/// Online player count; never absent.
pub fn players_online(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Player capacity; absent only when negative.
pub fn players_max(capacity: i64) -> Option<u32> {
    if capacity < 0 {
        return None;
    }
    Some(u32::try_from(capacity).unwrap_or(u32::MAX))
}

/// Rejects NaN, infinities and negative values, `-0.0` included.
fn measurable(value: f64) -> Option<f64> {
    (value.is_finite() && !value.is_sign_negative()).then_some(value)
}
