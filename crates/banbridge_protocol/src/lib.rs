//! # BanBridge Protocol
//!
//! Wire types for the BanBridge backend API.
//!
//! This crate provides:
//! - Ban change feed entries (`BanChange`, `BanChangesResponse`)
//! - Server commands and command type parsing (`ServerCommand`, `CommandKind`)
//! - Request bodies for stats, presence, metrics, acks and ban reports
//! - Endpoint paths
//!
//! All bodies are JSON with camelCase keys. This is a pure protocol crate
//! with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod commands;
mod messages;

pub use change_feed::{BanChange, BanChangesResponse, ChangeType};
pub use commands::{CommandAckRequest, CommandKind, CommandsPollResponse, ServerCommand};
pub use messages::{
    BanPayload, BanReportRequest, HealthResponse, PlayerDelta, PlayerPresence, PresenceRequest,
    ServerMetricsRequest, StatsBatchRequest,
};

/// Endpoint paths, relative to the backend base URL.
pub mod paths {
    /// `GET` backend health.
    pub const HEALTH: &str = "/api/server/health";
    /// `GET` ban changes since a cursor.
    pub const BAN_CHANGES: &str = "/api/server/bans/changes";
    /// `POST` a stats delta batch.
    pub const STATS_BATCH: &str = "/api/server/stats/batch";
    /// `POST` a presence snapshot.
    pub const PRESENCE: &str = "/api/server/presence";
    /// `POST` a metrics sample.
    pub const METRICS: &str = "/api/server/metrics";
    /// `GET` pending commands above a watermark.
    pub const COMMANDS_POLL: &str = "/api/server/commands/poll";
    /// `POST` a command acknowledgment.
    pub const COMMANDS_ACK: &str = "/api/server/commands/ack";
    /// `POST` a locally enforced ban.
    pub const BAN_REPORT: &str = "/api/server/bans/report";
}
