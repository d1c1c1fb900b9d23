//! Request and response bodies for the instance-facing endpoints.

use serde::{Deserialize, Serialize};

/// Response body of `GET /api/server/health`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Backend status string.
    #[serde(default)]
    pub status: Option<String>,
    /// Backend clock.
    #[serde(default)]
    pub server_time: Option<String>,
    /// Database health; absent means unknown.
    #[serde(default)]
    pub db_ok: Option<bool>,
}

/// Per-player deltas accumulated since the last successful flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDelta {
    /// Player identity.
    #[serde(alias = "xuid")]
    pub subject_id: String,
    /// Last known display name.
    pub name: String,
    /// Seconds played.
    pub playtime_delta_seconds: u64,
    /// Kills scored.
    pub kills_delta: u64,
    /// Deaths suffered.
    pub deaths_delta: u64,
}

/// Body of `POST /api/server/stats/batch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsBatchRequest {
    /// Players with at least one non-zero delta.
    pub players: Vec<PlayerDelta>,
}

impl StatsBatchRequest {
    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Returns the number of players in the batch.
    pub fn len(&self) -> usize {
        self.players.len()
    }
}

/// One online player in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPresence {
    /// Player identity.
    #[serde(alias = "xuid")]
    pub subject_id: String,
    /// Display name.
    pub name: Option<String>,
    /// Online flag; sent explicitly as `true` in snapshot mode.
    pub online: Option<bool>,
    /// Remote address.
    pub ip: Option<String>,
    /// Device identifier.
    pub hwid: Option<String>,
}

/// Body of `POST /api/server/presence`.
///
/// In snapshot mode the list is authoritative: any player missing from it
/// is marked offline by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRequest {
    /// Always `true` for this client.
    pub snapshot: bool,
    /// Full list of online players, possibly empty.
    pub players: Vec<PlayerPresence>,
}

impl PresenceRequest {
    /// Creates a snapshot-mode presence report.
    pub fn snapshot(players: Vec<PlayerPresence>) -> Self {
        Self {
            snapshot: true,
            players,
        }
    }

    /// Creates the empty snapshot sent when the instance goes offline.
    pub fn offline() -> Self {
        Self::snapshot(Vec::new())
    }
}

/// Body of `POST /api/server/metrics`.
///
/// Unmeasured values are sent as `null`, never as negative sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetricsRequest {
    /// Identity of this instance; never empty.
    pub server_key: String,
    /// Used memory in MiB.
    pub ram_used_mb: Option<u32>,
    /// Maximum memory in MiB.
    pub ram_max_mb: Option<u32>,
    /// System CPU load, 0.0..=1.2.
    pub cpu_load: Option<f64>,
    /// Online players.
    pub players_online: u32,
    /// Player capacity.
    pub players_max: Option<u32>,
    /// Ticks per second, 0.0..=25.0.
    pub tps: Option<f64>,
    /// Receive throughput in kbit/s.
    pub rx_kbps: Option<f64>,
    /// Transmit throughput in kbit/s.
    pub tx_kbps: Option<f64>,
}

/// Ban details inside a [`BanReportRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanPayload {
    /// Player identity.
    #[serde(alias = "xuid")]
    pub subject_id: String,
    /// Ban reason.
    pub reason: String,
    /// Duration; `None` means permanent.
    pub duration_seconds: Option<u64>,
    /// Remote address.
    pub ip: Option<String>,
    /// Device identifier.
    pub hwid: Option<String>,
    /// When the ban was enforced (RFC 3339).
    pub executed_at_iso: Option<String>,
}

/// Body of `POST /api/server/bans/report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanReportRequest {
    /// Identity of this instance.
    pub server_key: String,
    /// The enforced ban.
    pub ban: BanPayload,
}
