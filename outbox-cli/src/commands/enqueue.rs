//! Queue a message.

use anyhow::{Context, Result};

use outbox_types::{unix_millis, MessageId, MessagePayload, NewMessage};

use crate::config::CliContext;

/// Run the enqueue command.
pub async fn run(context: &CliContext, text: &str, id: Option<&str>, command: bool) -> Result<()> {
    let now = unix_millis();
    let payload = if command {
        MessagePayload::command(text, now)
    } else {
        MessagePayload::chat(text, now)
    };
    let message = match id {
        Some(id) => NewMessage::with_id(MessageId::new(id).context("Invalid message id")?, payload),
        None => NewMessage::new(payload),
    };

    let record = context
        .enqueue(message)
        .await
        .context("Failed to queue message")?;
    println!("Queued {} ({})", record.id, record.payload.kind());

    // Online, enqueue starts a drain; let it finish before we exit.
    context.flush().await;

    let stats = context.get_stats().await;
    println!(
        "Pending: {}  Failed: {}",
        stats.pending_messages, stats.failed_messages
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_context;
    use tempfile::tempdir;

    #[tokio::test]
    async fn offline_enqueue_stays_pending() {
        let dir = tempdir().unwrap();
        let context = test_context(dir.path(), true).await;

        run(&context, "agendar revisão", Some("m1"), false).await.unwrap();

        let record = context
            .outbox()
            .get(&MessageId::new("m1").unwrap())
            .await
            .unwrap();
        assert!(record.offline);
        assert_eq!(context.get_stats().await.pending_messages, 1);
        context.stop().await;
    }

    #[tokio::test]
    async fn online_enqueue_delivers() {
        let dir = tempdir().unwrap();
        let context = test_context(dir.path(), false).await;

        run(&context, "restart", None, true).await.unwrap();

        assert_eq!(context.get_stats().await.queue_length, 0);
        context.stop().await;
    }

    #[tokio::test]
    async fn invalid_id_is_an_error() {
        let dir = tempdir().unwrap();
        let context = test_context(dir.path(), true).await;

        assert!(run(&context, "hi", Some("bad id!"), false).await.is_err());
        context.stop().await;
    }
}
