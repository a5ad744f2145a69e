use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{CoordinatorConfig, SharedConfig};
use crate::coordinator::{bootstrap_config, Coordinator, HttpCoordinator};
use crate::options::WorkerOptions;
use crate::performance;
use crate::shutdown::{wait_for_signal, ShutdownMode};
use crate::topic::{TopicError, TopicSet};
use crate::worker::Worker;

/// Command running the worker until a signal or a fatal consumer error
pub struct WorkCommand {
    options: WorkerOptions,
    topics: TopicSet,
}

impl WorkCommand {
    /// Validate the options; nothing is started when they are invalid
    pub fn new(options: WorkerOptions) -> Result<Self, TopicError> {
        let topics = options.topics()?;
        Ok(Self { options, topics })
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        if self.options.graceful {
            ShutdownMode::Graceful(self.options.shutdown_grace())
        } else {
            ShutdownMode::Immediate
        }
    }

    /// Absolute path of the configuration file
    fn config_path(&self) -> Result<PathBuf> {
        let path = &self.options.config_file;
        if path.is_absolute() {
            return Ok(path.clone());
        }
        Ok(std::env::current_dir()
            .context("Failed to resolve the current directory")?
            .join(path))
    }

    pub async fn execute(&self) -> Result<()> {
        // Removed when the command returns
        let temp_dir = tempfile::Builder::new()
            .prefix("recon-worker-")
            .tempdir()
            .context("Failed to create the worker temp directory")?;

        let config_path = self.config_path()?;
        if !config_path.exists() {
            let bootstrap = HttpCoordinator::new(&CoordinatorConfig::default(), self.options.tls)?;
            bootstrap_config(&bootstrap, &config_path)
                .await
                .with_context(|| format!("Config file {config_path:?} is missing"))?;
        }
        let config = SharedConfig::open(config_path).await?;

        let coordinator: Arc<dyn Coordinator> = Arc::new(HttpCoordinator::new(
            &config.current().coordinator,
            self.options.tls,
        )?);

        let performance = performance::detect(self.options.performance);
        info!("Worker performance tier: {}", performance);

        let worker = Worker::new(
            self.options.clone(),
            self.topics.clone(),
            performance,
            config,
            temp_dir.path().to_path_buf(),
        );
        info!(
            "✅ Starting worker {} on topics [{}] with concurrency {}",
            worker.status.snapshot().worker_name,
            self.topics,
            self.options.concurrency
        );

        let broker = worker.directory_broker();
        let forward_listener = worker.tcp_forwarder();
        let tasks = worker.start(coordinator, broker, forward_listener);

        tokio::select! {
            _ = wait_for_signal() => {
                self.stop(&worker, tasks).await;
                Ok(())
            }
            _ = worker.fatal.wait() => {
                Err(worker
                    .fatal
                    .error()
                    .unwrap_or_else(|| anyhow!("worker stopped after a fatal error")))
            }
        }
    }

    async fn stop(&self, worker: &Worker, mut tasks: JoinSet<()>) {
        match self.shutdown_mode() {
            ShutdownMode::Immediate => {}
            ShutdownMode::Graceful(grace) => {
                info!("Stopping background tasks (grace {}s)", grace.as_secs());
                worker.shutdown.cancel();
                let drained = tokio::time::timeout(grace, async {
                    while tasks.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    warn!("Background tasks still running after the grace period");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invalid_mode_is_rejected_up_front() {
        let options = WorkerOptions {
            mode: "9".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            WorkCommand::new(options),
            Err(TopicError::InvalidRunMode(_))
        ));
    }

    #[test]
    fn test_custom_mode_requires_workspaces() {
        let options = WorkerOptions {
            mode: "5".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            WorkCommand::new(options),
            Err(TopicError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn test_shutdown_mode_selection() {
        let immediate = WorkCommand::new(WorkerOptions::default()).unwrap();
        assert_eq!(immediate.shutdown_mode(), ShutdownMode::Immediate);
        assert_eq!(immediate.topics().len(), 4);

        let graceful = WorkCommand::new(WorkerOptions {
            graceful: true,
            shutdown_grace_secs: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            graceful.shutdown_mode(),
            ShutdownMode::Graceful(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn test_unparseable_config_fails_startup() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("worker.yml");
        std::fs::write(&path, "broker: [").unwrap();

        let command = WorkCommand::new(WorkerOptions {
            config_file: path,
            ..Default::default()
        })
        .unwrap();
        assert!(command.execute().await.is_err());
    }
}
