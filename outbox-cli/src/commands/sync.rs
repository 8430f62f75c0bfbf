//! Drain the queue once.

use anyhow::Result;

use super::describe;
use crate::config::CliContext;

/// Run the sync command.
pub async fn run(context: &CliContext) -> Result<()> {
    print!("{}", report(context).await);
    Ok(())
}

async fn report(context: &CliContext) -> String {
    let outcome = context.force_sync().await;
    let mut out = format!("{}\n", describe(&outcome));

    let stats = context.get_stats().await;
    if stats.queue_length > 0 {
        out.push_str(&format!(
            "Remaining: {} pending, {} failed\n",
            stats.pending_messages, stats.failed_messages
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{enqueue, test_context};
    use tempfile::tempdir;

    #[tokio::test]
    async fn sync_delivers_messages_queued_offline() {
        let dir = tempdir().unwrap();

        let offline = test_context(dir.path(), true).await;
        enqueue::run(&offline, "one", None, false).await.unwrap();
        enqueue::run(&offline, "two", None, false).await.unwrap();
        offline.stop().await;
        drop(offline);

        let online = test_context(dir.path(), false).await;
        run(&online).await.unwrap();

        assert_eq!(online.get_stats().await.queue_length, 0);
        online.stop().await;
    }

    #[tokio::test]
    async fn sync_reports_the_pass_it_ran() {
        let dir = tempdir().unwrap();
        let offline = test_context(dir.path(), true).await;
        enqueue::run(&offline, "one", None, false).await.unwrap();
        enqueue::run(&offline, "two", None, false).await.unwrap();
        offline.stop().await;
        drop(offline);

        let online = test_context(dir.path(), false).await;
        let out = report(&online).await;

        assert_eq!(out, "Synced 2 of 2 (0 failed)\n");
        online.stop().await;
    }

    #[tokio::test]
    async fn sync_while_offline_keeps_queue() {
        let dir = tempdir().unwrap();
        let context = test_context(dir.path(), true).await;
        enqueue::run(&context, "one", None, false).await.unwrap();

        run(&context).await.unwrap();

        assert_eq!(context.get_stats().await.pending_messages, 1);
        context.stop().await;
    }
}
