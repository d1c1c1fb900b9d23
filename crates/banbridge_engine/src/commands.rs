//! Remote command poll and acknowledgement.
//!
//! Each command moves through `Unseen -> Executed -> Acknowledged`. The
//! watermark only advances once the backend accepted the acknowledgement,
//! so a command that ran but was not acked is delivered again. Handlers
//! therefore have to be idempotent.

use crate::client::BackendClient;
use crate::error::BridgeResult;
use crate::transport::HttpClient;
use banbridge_protocol::{CommandKind, ServerCommand};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Runs recognized commands.
pub trait CommandExecutor: Send + Sync {
    /// Executes `kind`. `payload_json` is passed through untouched.
    ///
    /// Only called with [`CommandKind::Shutdown`] or [`CommandKind::RefreshBans`].
    fn execute(&self, kind: &CommandKind, payload_json: Option<&str>) -> BridgeResult<()>;
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Commands in the response.
    pub received: usize,
    /// Commands at or below the watermark.
    pub skipped: usize,
    /// Commands that failed to execute or had an unknown type.
    pub failed: usize,
    /// Commands executed but not acknowledged.
    pub unacked: usize,
    /// Commands executed and acknowledged.
    pub acknowledged: usize,
}

/// Watermark of the highest acknowledged command id.
#[derive(Debug, Default)]
pub struct CommandCursor {
    watermark: AtomicU64,
}

impl CommandCursor {
    /// Creates a cursor starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cursor starting at `watermark`.
    pub fn starting_at(watermark: u64) -> Self {
        Self {
            watermark: AtomicU64::new(watermark),
        }
    }

    /// Highest acknowledged command id.
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Acquire)
    }

    /// Returns true if `id` is above the watermark.
    pub fn is_pending(&self, id: u64) -> bool {
        id > self.watermark()
    }

    /// Raises the watermark to `id` if it is higher.
    pub fn advance(&self, id: u64) {
        self.watermark.fetch_max(id, Ordering::AcqRel);
    }

    /// Polls for new commands and processes them in the order received.
    ///
    /// A failed poll is an empty cycle.
    pub async fn poll_once<C, E>(&self, client: &BackendClient<C>, executor: &E) -> PollSummary
    where
        C: HttpClient,
        E: CommandExecutor + ?Sized,
    {
        let since_id = self.watermark();
        let Some(response) = client.poll_commands(since_id).await else {
            return PollSummary::default();
        };
        self.process(client, executor, &response.commands).await
    }

    /// Executes and acknowledges each pending command.
    pub async fn process<C, E>(
        &self,
        client: &BackendClient<C>,
        executor: &E,
        commands: &[ServerCommand],
    ) -> PollSummary
    where
        C: HttpClient,
        E: CommandExecutor + ?Sized,
    {
        let mut summary = PollSummary {
            received: commands.len(),
            ..Default::default()
        };

        for command in commands {
            let id = command.id;
            // The backend filters by `sinceId` too; this check is the one that counts.
            if !self.is_pending(id) {
                summary.skipped += 1;
                continue;
            }

            if !self.run(executor, command) {
                summary.failed += 1;
                continue;
            }

            if client.ack_command(id).await {
                self.advance(id);
                summary.acknowledged += 1;
                debug!(command_id = id, watermark = self.watermark(), "command acknowledged");
            } else {
                summary.unacked += 1;
                warn!(command_id = id, "command ack failed, will retry next poll");
            }
        }

        summary
    }

    fn run<E: CommandExecutor + ?Sized>(&self, executor: &E, command: &ServerCommand) -> bool {
        let kind = command.kind();
        if let CommandKind::Unknown(raw) = &kind {
            warn!(command_id = command.id, cmd_type = %raw, "unknown backend command");
            return false;
        }

        info!(command_id = command.id, cmd_type = kind.as_str(), "executing backend command");
        match executor.execute(&kind, command.payload_json.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                error!(command_id = command.id, cmd_type = kind.as_str(), error = %e, "command execution failed");
                false
            }
        }
    }
}
