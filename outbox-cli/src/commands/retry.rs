//! Reset failed messages and drain.

use anyhow::Result;

use super::describe;
use crate::config::CliContext;

/// Run the retry-failed command.
pub async fn run(context: &CliContext) -> Result<()> {
    let reset = context.retry_failed_messages().await;
    if reset == 0 {
        println!("No failed messages");
        return Ok(());
    }
    println!("Reset {} failed messages", reset);

    for outcome in context.flush().await {
        if let outbox_client::DrainOutcome::Completed(_) = outcome {
            println!("{}", describe(&outcome));
        }
    }

    let stats = context.get_stats().await;
    println!(
        "Pending: {}  Failed: {}",
        stats.pending_messages, stats.failed_messages
    );
    Ok(())
}
