use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use skachka_core::{Config, Dispatcher, Pipeline, WorkspaceManager, YtDlpSource};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{handlers::Frontend, sink::TelegramSink, telegram::TelegramClient};

mod handlers;
mod sink;
mod telegram;

/// How long one getUpdates call is allowed to hang waiting for updates.
const POLL_INTERVAL: Duration = Duration::from_secs(50);

#[derive(Parser)]
#[command(name = "skachka")]
#[command(about = "Telegram bot that downloads YouTube media as MP3 or MP4")]
struct Cli {
    /// Bot API token
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    token: String,

    /// TOML config file; built-in defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for per-job scratch space
    #[arg(long)]
    workspace_root: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config: Config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };
    config
        .validate()
        .map_err(|reason| anyhow!("invalid config: {reason}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let client = Arc::new(TelegramClient::new(&cli.token));
    let sink = Arc::new(TelegramSink::new(client.clone(), config.upload_timeout()));
    let workspaces = WorkspaceManager::new(
        cli.workspace_root
            .unwrap_or_else(WorkspaceManager::default_root),
    );
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(YtDlpSource::new(&config)),
        sink.clone(),
        workspaces,
        config.clone(),
    ));
    let dispatcher = Dispatcher::start(pipeline, sink, config.workers, config.queue_capacity);
    let frontend = Frontend::new(client.clone(), dispatcher);

    info!(
        workers = config.workers,
        queue = config.queue_capacity,
        ceiling = config.size_ceiling_bytes,
        "skachka is up, long-polling for updates"
    );

    let mut offset = 0i64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                frontend.shutdown();
                break;
            }
            updates = client.get_updates(offset, POLL_INTERVAL) => match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        frontend.handle_update(update).await;
                    }
                }
                Err(e) => {
                    warn!("getUpdates failed: {e:#}");
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/skachka.toml"))).is_err());
    }

    #[test]
    fn a_config_with_an_empty_ladder_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skachka.toml");
        std::fs::write(&path, "video_height_ladder = []\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skachka.toml");
        std::fs::write(
            &path,
            "workers = 3\nsize_ceiling_bytes = 1048576\nvideo_height_ladder = [480]\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.size_ceiling_bytes, 1_048_576);
        assert_eq!(config.video_height_ladder, vec![480]);
        assert_eq!(config.queue_capacity, Config::default().queue_capacity);
    }
}
