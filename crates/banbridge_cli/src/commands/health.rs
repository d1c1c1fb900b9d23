//! Health command implementation.

use banbridge_engine::{BackendClient, BridgeConfig};
use banbridge_protocol::HealthResponse;

/// Runs the health command.
pub async fn run(config: &BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = BackendClient::from_config(config)?;
    println!("Probing {}", client.base_url());

    let Some(health) = client.health().await else {
        println!("✗ Backend unreachable");
        return Err("health check failed".into());
    };
    print_health(&health);
    Ok(())
}

fn print_health(health: &HealthResponse) {
    let db = match health.db_ok {
        Some(true) => "OK",
        Some(false) => "FAIL",
        None => "unknown",
    };
    println!("✓ Backend reachable");
    println!("  Status:      {}", health.status.as_deref().unwrap_or("n/a"));
    println!(
        "  Server time: {}",
        health.server_time.as_deref().unwrap_or("n/a")
    );
    println!("  Database:    {}", db);
}
