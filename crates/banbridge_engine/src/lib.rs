//! # BanBridge Engine
//!
//! Synchronization core that keeps a game server consistent with the
//! BanBridge backend.
//!
//! This crate provides:
//! - A resilient request layer (bearer auth, retry with jittered backoff)
//! - An incrementally synced, locally persisted ban cache
//! - A concurrent stats accumulator with requeue on failed flushes
//! - A command cursor that only advances after acknowledgement
//! - Telemetry sanitization and throughput sampling
//! - The [`Bridge`] that drives all of the above from periodic triggers
//!
//! ## Key Invariants
//!
//! - The ban cursor never moves backwards
//! - Re-applying a change feed is a no-op
//! - A command is acknowledged only after it ran
//! - The command watermark advances only after a successful ack
//! - Unmeasurable telemetry is sent as null, never as a negative number
//! - Nothing above the request layer sees a transport error

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bandwidth;
mod bans;
mod bridge;
mod client;
mod commands;
mod config;
mod error;
mod host;
mod http;
mod sanitize;
mod stats;
mod transport;

pub use bandwidth::{
    is_virtual_interface, parse_proc_net_dev, select_meter, sum_interfaces, BandwidthMeter,
    BandwidthSample, LinuxBandwidthMeter, SystemBandwidthMeter,
};
pub use bans::{format_instant, parse_instant, ApplyOutcome, BanCache, BanRecord, SyncToken};
pub use bridge::{Bridge, LOCAL_BAN_REFUSAL, SHUTDOWN_GRACE};
pub use client::{BackendClient, PostOutcome};
pub use commands::{CommandCursor, CommandExecutor, PollSummary};
pub use config::{
    ApiConfig, BridgeConfig, CacheConfig, MetricsConfig, RetryConfig, SyncIntervals, SyncSettings,
    RATE_LIMIT_FLOOR,
};
pub use error::{BridgeError, BridgeResult};
pub use host::{GameHost, HeadlessHost, MemoryUsage, OnlinePlayer};
pub use http::ReqwestClient;
pub use sanitize::{metrics_request, RawMetrics};
pub use stats::{StatsAccumulator, UNKNOWN_NAME};
pub use transport::{HttpClient, HttpRequest, HttpResponse, Method, MockHttpClient, MockReply};
