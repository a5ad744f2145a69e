use anyhow::{anyhow, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;

/// Reloads the shared configuration whenever its file changes
pub struct ConfigWatcher {
    config: SharedConfig,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Watch the file behind `config`; the path is made absolute here
    pub fn new(config: SharedConfig) -> Result<Self> {
        let path = if config.path().is_absolute() {
            config.path().to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to resolve the current directory")?
                .join(config.path())
        };
        Ok(Self { config, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a filesystem event concerns the watched file
    fn is_relevant(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event.paths.iter().any(|p| p == &self.path)
    }

    /// Start the filesystem watch; events are forwarded to the returned channel
    fn start_watch(&self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<Event>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!("Config watch error: {}", e),
        })
        .context("Failed to create config file watcher")?;

        // Watch the directory so replacing the file (write + rename) is seen too
        let dir = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("Config path {:?} has no parent directory", self.path))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {dir:?}"))?;

        Ok((watcher, rx))
    }

    /// Reload on every change notification until cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let (_watcher, mut events) = self.start_watch()?;
        info!("👀 Watching config file {:?}", self.path);

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if !self.is_relevant(&event) {
                continue;
            }
            debug!("Config change detected: {:?}", event.kind);
            // A failed reload keeps the previous config and is logged by reload()
            let _ = self.config.reload().await;
        }

        debug!("Config watcher stopped");
        Ok(())
    }
}
