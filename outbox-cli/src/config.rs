//! Configuration and context setup for the outbox CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use outbox_client::{
    HttpTransport, MockTransport, OutboxConfig, RemoteTransport, SyncEngineContext,
};

/// Name of the config file looked up in the data directory.
pub const CONFIG_FILE: &str = "outbox.toml";

/// Context type every command works with.
pub type CliContext = SyncEngineContext<Arc<dyn RemoteTransport>>;

/// Global options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// Explicit config file.
    pub config: Option<PathBuf>,
    /// Explicit data directory.
    pub data_dir: Option<PathBuf>,
    /// Use the mock transport.
    pub mock: bool,
    /// Start offline.
    pub offline: bool,
}

/// Get the default data directory for the outbox CLI.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "offline-outbox")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Load the config: the explicit file if given, else `outbox.toml` in the
/// data directory if present, else defaults.
pub fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<OutboxConfig> {
    let config = match explicit {
        Some(path) => OutboxConfig::from_file(path)?,
        None => {
            let path = data_dir.join(CONFIG_FILE);
            if path.exists() {
                OutboxConfig::from_file(&path)?
            } else {
                OutboxConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

fn transport(config: &OutboxConfig, mock: bool) -> Result<Arc<dyn RemoteTransport>> {
    if mock {
        return Ok(Arc::new(MockTransport::new()));
    }
    let endpoint = config.transport.endpoint.as_deref().context(
        "No transport endpoint configured. Set [transport] endpoint in outbox.toml or pass --mock.",
    )?;
    let transport = HttpTransport::new(endpoint).context("Failed to create HTTP transport")?;
    Ok(Arc::new(transport))
}

/// Open and start a context for one CLI invocation.
///
/// The context starts idle: only commands that deliver start a drain.
pub async fn open_context(options: &CliOptions) -> Result<CliContext> {
    let data_dir = match &options.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let config = load_config(options.config.as_deref(), &data_dir)?;
    let transport = transport(&config, options.mock)?;

    let context = SyncEngineContext::open(config, &data_dir, transport)
        .await
        .context("Failed to open outbox")?;
    if options.offline {
        context.set_online(false);
    }
    context.start_idle().await;
    tracing::debug!("Opened outbox in {}", data_dir.display());
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(None, dir.path()).unwrap();
        assert_eq!(config.queue.max_offline_messages, 100);
    }

    #[test]
    fn config_file_in_data_dir_is_picked_up() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[queue]\nmax_offline_messages = 5\n",
        )
        .unwrap();

        let config = load_config(None, dir.path()).unwrap();

        assert_eq!(config.queue.max_offline_messages, 5);
        assert_eq!(config.queue.retry_attempts, 3);
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[queue]\nretry_attempts = 0\n").unwrap();

        assert!(load_config(Some(&path), dir.path()).is_err());
    }

    #[test]
    fn http_transport_requires_endpoint() {
        let config = OutboxConfig::default();
        assert!(transport(&config, false).is_err());
        assert!(transport(&config, true).is_ok());
    }

    #[tokio::test]
    async fn open_context_creates_store() {
        let dir = tempdir().unwrap();
        let options = CliOptions {
            data_dir: Some(dir.path().join("nested")),
            mock: true,
            offline: true,
            ..Default::default()
        };

        let context = open_context(&options).await.unwrap();

        assert!(!context.is_online());
        assert!(dir.path().join("nested").join("outbox.db").exists());
        context.stop().await;
    }
}
