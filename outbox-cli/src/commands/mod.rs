//! CLI command implementations.

pub mod clear;
pub mod enqueue;
pub mod retry;
pub mod status;
pub mod sync;

use outbox_client::DrainOutcome;

/// One-line description of a drain outcome.
pub fn describe(outcome: &DrainOutcome) -> String {
    match outcome {
        DrainOutcome::Completed(summary) => format!(
            "Synced {} of {} ({} failed)",
            summary.synced_count, summary.total_attempted, summary.failed_count
        ),
        DrainOutcome::Idle => "Nothing to sync".to_string(),
        DrainOutcome::Coalesced => "A sync is already running".to_string(),
        DrainOutcome::Offline => "Offline: messages stay queued".to_string(),
        DrainOutcome::LeaseHeld => "Another process is syncing this outbox".to_string(),
    }
}


/// Context over a temp data dir with the acknowledging mock transport.
#[cfg(test)]
pub(crate) async fn test_context(dir: &std::path::Path, offline: bool) -> crate::config::CliContext {
    crate::config::open_context(&crate::config::CliOptions {
        data_dir: Some(dir.to_path_buf()),
        mock: true,
        offline,
        ..Default::default()
    })
    .await
    .unwrap()
}
