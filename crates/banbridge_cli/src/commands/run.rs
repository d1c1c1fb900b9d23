//! Run command implementation.

use banbridge_engine::{Bridge, BridgeConfig, HeadlessHost};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs the bridge against a headless host until Ctrl-C or a remote
/// shutdown command, then performs the shutdown sequence.
pub async fn run(config: BridgeConfig, max_players: i64) -> Result<(), Box<dyn std::error::Error>> {
    let stop = CancellationToken::new();
    let host = HeadlessHost::new(max_players, stop.clone());
    let bridge = Arc::new(Bridge::connect(config, host)?);

    let tasks = bridge.start().await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot listen for Ctrl-C");
            }
            info!("interrupted");
        }
        _ = stop.cancelled() => {
            info!("shutdown requested by backend");
        }
    }

    bridge.shutdown().await;
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "periodic task ended abnormally");
        }
    }
    Ok(())
}
