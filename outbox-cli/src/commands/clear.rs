//! Discard every queued message.

use anyhow::Result;

use crate::config::CliContext;

/// Run the clear command. Requires explicit confirmation.
pub async fn run(context: &CliContext, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to discard queued messages without --yes");
    }

    let discarded = context.get_stats().await.queue_length;
    context.clear_queue().await;
    println!("Discarded {} messages", discarded);
    Ok(())
}
