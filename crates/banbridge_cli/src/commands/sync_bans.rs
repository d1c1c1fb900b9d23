//! Sync-bans command implementation.

use banbridge_engine::{format_instant, Bridge, BridgeConfig, HeadlessHost};
use tokio_util::sync::CancellationToken;

/// Runs the sync-bans command.
///
/// Loads the cache, applies one feed from the backend and saves the result.
pub async fn run(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bridge = Bridge::connect(config, HeadlessHost::new(0, CancellationToken::new()))?;
    let loaded = bridge.bans().load();
    println!(
        "Loaded {} ban(s) from {}",
        loaded,
        bridge.bans().path().display()
    );

    let Some(outcome) = bridge.sync_bans().await else {
        println!("✗ Ban sync failed");
        return Err("ban sync failed".into());
    };
    bridge.bans().try_persist()?;

    println!("✓ Ban sync complete");
    println!("  Changed:       {}", outcome.changed);
    println!("  Newly banned:  {}", outcome.newly_banned.len());
    for record in &outcome.newly_banned {
        println!(
            "    #{} {} ({})",
            record.ban_id,
            record.subject_id,
            record.reason.as_deref().unwrap_or("no reason")
        );
    }
    println!("  Active bans:   {}", bridge.bans().len());
    println!("  Cursor:        {}", format_instant(&bridge.bans().cursor()));
    Ok(())
}
