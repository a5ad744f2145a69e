use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs as async_fs;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SharedConfig;
use crate::consumer::Broker;
use crate::executor::TaskExecutor;
use crate::job::Task;
use crate::status::StatusStore;

/// Directory-backed queue of one topic with atomic claiming
pub struct TopicQueue {
    pub topic: String,
    pub queue_dir: PathBuf,
    pub in_progress_dir: PathBuf,
    pub completed_dir: PathBuf,
    pub failed_dir: PathBuf,
}

impl TopicQueue {
    /// Create a queue for `topic` below the broker root
    pub fn new(root: PathBuf, topic: &str) -> Self {
        let topic_root = root.join(topic);
        Self {
            topic: topic.to_string(),
            queue_dir: topic_root.join("_queue"),
            in_progress_dir: topic_root.join("_in_progress"),
            completed_dir: topic_root.join("_completed"),
            failed_dir: topic_root.join("_failed"),
        }
    }

    /// Initialize queue directories
    pub async fn init(&self) -> Result<()> {
        for dir in [
            &self.queue_dir,
            &self.in_progress_dir,
            &self.completed_dir,
            &self.failed_dir,
        ] {
            async_fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create queue directory {dir:?}"))?;
        }
        Ok(())
    }

    /// Publish a task; written under a temporary name and renamed into place
    pub async fn enqueue(&self, task: &Task) -> Result<()> {
        let task_path = self.queue_dir.join(task.task_filename());
        let staging_path = self.queue_dir.join(format!("{}.tmp", task.id));

        async_fs::write(&staging_path, task.to_json()?).await?;
        if let Err(e) = async_fs::rename(&staging_path, &task_path).await {
            let _ = async_fs::remove_file(&staging_path).await;
            return Err(anyhow!("Failed to publish task {}: {}", task.id, e));
        }
        debug!("Published task {} on {}", task.id, self.topic);
        Ok(())
    }

    /// Atomically claim a task from the queue
    pub async fn claim(self: &Arc<Self>) -> Result<Option<ClaimedTask>> {
        let mut entries = async_fs::read_dir(&self.queue_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "task") {
                continue;
            }
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("Invalid task filename"))?
                .to_string();

            let in_progress_path = self.in_progress_dir.join(&file_name);

            // Losing the rename race means another worker owns the task
            if async_fs::rename(&path, &in_progress_path).await.is_err() {
                continue;
            }

            let parsed = match async_fs::read_to_string(&in_progress_path).await {
                Ok(content) => Task::from_json(&content),
                Err(e) => Err(anyhow!(e).context("Failed to read task file")),
            };
            match parsed {
                Ok(task) => {
                    debug!("Claimed task: {}", file_name);
                    return Ok(Some(ClaimedTask {
                        queue: Arc::clone(self),
                        file_name,
                        task,
                    }));
                }
                Err(e) => {
                    warn!("Discarding malformed task {}: {:#}", file_name, e);
                    async_fs::rename(&in_progress_path, self.failed_dir.join(&file_name))
                        .await?;
                }
            }
        }

        Ok(None)
    }

    /// Get count of pending tasks
    pub async fn pending_count(&self) -> Result<usize> {
        let mut count = 0;
        let mut entries = async_fs::read_dir(&self.queue_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "task") {
                count += 1;
            }
        }

        Ok(count)
    }
}

/// A task claimed by this worker
pub struct ClaimedTask {
    queue: Arc<TopicQueue>,
    file_name: String,
    pub task: Task,
}

impl ClaimedTask {
    /// Mark the task as completed
    pub async fn complete(self) -> Result<()> {
        self.finish(&self.queue.completed_dir).await?;
        debug!("Marked task as completed: {}", self.file_name);
        Ok(())
    }

    /// Move the task to the failed directory
    pub async fn fail(self) -> Result<()> {
        self.finish(&self.queue.failed_dir).await?;
        warn!("Marked task as failed: {}", self.file_name);
        Ok(())
    }

    async fn finish(&self, dir: &std::path::Path) -> Result<()> {
        let from = self.queue.in_progress_dir.join(&self.file_name);
        async_fs::rename(&from, dir.join(&self.file_name)).await?;
        Ok(())
    }
}

/// Topic names become directory names, so only path-safe names are accepted
pub fn validate_topic(topic: &str) -> Result<()> {
    let safe = !topic.is_empty()
        && topic != "."
        && topic != ".."
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if safe {
        Ok(())
    } else {
        Err(anyhow!("Invalid topic name: {topic:?}"))
    }
}

/// Broker that serves topics from queue directories on a shared filesystem
pub struct DirectoryBroker {
    config: SharedConfig,
    executor: Arc<dyn TaskExecutor>,
    status: StatusStore,
    shutdown: CancellationToken,
}

impl DirectoryBroker {
    pub fn new(
        config: SharedConfig,
        executor: Arc<dyn TaskExecutor>,
        status: StatusStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            executor,
            status,
            shutdown,
        }
    }

    /// Queue handle for a topic under the configured root
    pub fn queue(&self, topic: &str) -> TopicQueue {
        TopicQueue::new(self.config.current().broker.queue_root.clone(), topic)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.current().broker.poll_interval_secs.max(1))
    }

    /// Sleep for the poll interval; returns false when cancelled
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval()) => true,
        }
    }

    async fn run_task(
        claimed: ClaimedTask,
        executor: Arc<dyn TaskExecutor>,
        status: StatusStore,
        _slot: OwnedSemaphorePermit,
    ) {
        let task_id = claimed.task.id.clone();
        info!("➡️ Claimed task {} on {}", task_id, claimed.task.topic);

        let outcome = executor.execute(&claimed.task).await;
        status.record_task(outcome.is_ok());

        let moved = match outcome {
            Ok(()) => claimed.complete().await,
            Err(e) => {
                error!("❌ Task {} FAILED: {:#}", task_id, e);
                claimed.fail().await
            }
        };
        if let Err(e) = moved {
            error!("Failed to move task {}: {:#}", task_id, e);
        }
    }
}

#[async_trait]
impl Broker for DirectoryBroker {
    async fn consume(&self, topic: &str, concurrency: usize) -> Result<()> {
        validate_topic(topic)?;
        let queue = Arc::new(self.queue(topic));
        queue
            .init()
            .await
            .with_context(|| format!("Failed to subscribe to topic {topic}"))?;

        info!(
            "📡 Subscribed to topic {} with concurrency {}",
            topic, concurrency
        );
        let slots = Arc::new(Semaphore::new(concurrency.max(1)));

        loop {
            let slot = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                slot = Arc::clone(&slots).acquire_owned() => slot?,
            };

            match queue.claim().await {
                Ok(Some(claimed)) => {
                    tokio::spawn(Self::run_task(
                        claimed,
                        Arc::clone(&self.executor),
                        self.status.clone(),
                        slot,
                    ));
                }
                Ok(None) => {
                    drop(slot);
                    debug!("💤 No tasks on {}.", topic);
                    if !self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    drop(slot);
                    warn!("Failed to claim a task on {}: {:#}", topic, e);
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }

        info!("Stopped consuming topic {}", topic);
        Ok(())
    }
}
