//! Show queue and capability stats.

use anyhow::{Context, Result};

use outbox_client::SyncStats;

use crate::config::CliContext;

/// Run the status command.
pub async fn run(context: &CliContext, json: bool) -> Result<()> {
    let stats = context.get_stats().await;
    if json {
        let out = serde_json::to_string_pretty(&stats).context("Failed to encode stats")?;
        println!("{}", out);
    } else {
        print!("{}", render(&stats));
    }
    Ok(())
}

fn render(stats: &SyncStats) -> String {
    let mut out = String::from("=== outbox status ===\n\n");

    out.push_str("Queue:\n");
    out.push_str(&format!("  Length:  {}\n", stats.queue_length));
    out.push_str(&format!("  Pending: {}\n", stats.pending_messages));
    out.push_str(&format!("  Failed:  {}\n", stats.failed_messages));
    out.push('\n');

    out.push_str("Sync:\n");
    out.push_str(&format!(
        "  Network: {}\n",
        if stats.is_online { "online" } else { "offline" }
    ));
    match (stats.last_sync_time, stats.last_sync_status) {
        (Some(at), Some(status)) => out.push_str(&format!(
            "  Last:    {} ({:?})\n",
            format_timestamp(at, outbox_types::unix_millis()),
            status
        )),
        _ => out.push_str("  Last:    never\n"),
    }
    out.push('\n');

    out.push_str("Storage:\n");
    out.push_str(&format!(
        "  Tier:    {}{}\n",
        stats.store_tier,
        if stats.durable_store_ready { "" } else { " (not durable)" }
    ));
    if let Some(usage) = &stats.storage_usage {
        match usage.quota_bytes {
            Some(quota) => out.push_str(&format!(
                "  Usage:   {} of {} bytes\n",
                usage.used_bytes, quota
            )),
            None => out.push_str(&format!("  Usage:   {} bytes\n", usage.used_bytes)),
        }
    }
    out.push_str(&format!(
        "  Background sync: {}\n",
        if stats.background_sync_supported {
            "supported"
        } else {
            "unsupported"
        }
    ));
    out
}

/// Format a Unix millisecond timestamp relative to `now`.
fn format_timestamp(ts: i64, now: i64) -> String {
    let diff = (now - ts).max(0) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
