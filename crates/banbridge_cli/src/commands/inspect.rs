//! Inspect command implementation.

use banbridge_engine::{format_instant, BanCache, BanRecord};
use serde::Serialize;
use std::path::Path;

/// Ban cache inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Cache file path.
    pub path: String,
    /// Sync cursor.
    pub cursor: String,
    /// Number of active bans.
    pub active_count: usize,
    /// Number of permanent bans among them.
    pub permanent_count: usize,
    /// Active bans (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<BanRecord>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_entries: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No ban cache found at {:?}", path).into());
    }

    let cache = BanCache::new(path);
    cache.load();
    let records = cache.records();

    let result = InspectResult {
        path: path.display().to_string(),
        cursor: format_instant(&cache.cursor()),
        active_count: records.len(),
        permanent_count: records.iter().filter(|r| r.is_permanent()).count(),
        entries: show_entries.then_some(records),
    };

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Ban Cache: {}", result.path);
    println!();
    println!("Cursor:          {}", result.cursor);
    println!("Active bans:     {}", result.active_count);
    println!("Permanent:       {}", result.permanent_count);

    if let Some(entries) = &result.entries {
        println!();
        println!("Entries:");
        for record in entries {
            let expires = record
                .expires_at
                .as_ref()
                .map_or_else(|| "never".to_string(), format_instant);
            println!(
                "  #{:<6} {:<24} expires {:<24} {}",
                record.ban_id,
                record.subject_id,
                expires,
                record.reason.as_deref().unwrap_or("")
            );
        }
    }
}
