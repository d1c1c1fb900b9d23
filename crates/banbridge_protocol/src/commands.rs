//! Remote commands: poll response, command kinds and acknowledgment.

use serde::{Deserialize, Serialize};

/// Kind of a remotely issued command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Stop the game server.
    Shutdown,
    /// Discard the local ban cache and resync from the epoch.
    RefreshBans,
    /// Anything this client does not understand.
    Unknown(String),
}

impl CommandKind {
    /// Parses a command type, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "SHUTDOWN" => CommandKind::Shutdown,
            "REFRESH_BANS" => CommandKind::RefreshBans,
            _ => CommandKind::Unknown(normalized),
        }
    }

    /// Returns the canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Shutdown => "SHUTDOWN",
            CommandKind::RefreshBans => "REFRESH_BANS",
            CommandKind::Unknown(raw) => raw,
        }
    }
}

/// A command issued by the backend for this instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommand {
    /// Monotonic command id.
    pub id: u64,
    /// Command type (`SHUTDOWN`, `REFRESH_BANS`).
    #[serde(default)]
    pub cmd_type: Option<String>,
    /// Optional JSON payload, passed through as text.
    #[serde(default)]
    pub payload_json: Option<String>,
    /// Creation instant (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ServerCommand {
    /// Returns the parsed command kind. A missing type is unknown.
    pub fn kind(&self) -> CommandKind {
        CommandKind::parse(self.cmd_type.as_deref().unwrap_or_default())
    }
}

/// Response body of `GET /api/server/commands/poll`.
///
/// Unknown fields (such as a root-level `serverKey`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsPollResponse {
    /// Backend clock at response time.
    #[serde(default)]
    pub server_time: Option<String>,
    /// Pending commands.
    #[serde(default)]
    pub commands: Vec<ServerCommand>,
}

/// Body of `POST /api/server/commands/ack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAckRequest {
    /// Identity of this instance.
    pub server_key: String,
    /// Id of the executed command.
    pub id: u64,
}
