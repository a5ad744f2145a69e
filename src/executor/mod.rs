use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::SharedConfig;
use crate::job::Task;
use crate::performance::PerformanceTier;
use crate::proxy::ForwardState;

/// Runs a dequeued task to completion
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<()>;
}

/// Executes tasks by running the program configured for their topic.
///
/// The task JSON is written to the program's stdin; the worker context is
/// exported through `RECON_WORKER_*` environment variables.
pub struct CommandExecutor {
    config: SharedConfig,
    performance: PerformanceTier,
    forward: ForwardState,
    temp_dir: PathBuf,
}

impl CommandExecutor {
    pub fn new(
        config: SharedConfig,
        performance: PerformanceTier,
        forward: ForwardState,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            performance,
            forward,
            temp_dir,
        }
    }

    /// Build the task command from the configuration currently in effect
    fn build_command(&self, task: &Task) -> Result<Command> {
        let config = self.config.current();
        let task_command = config
            .task_command(&task.topic)
            .filter(|command| !command.program.is_empty())
            .ok_or_else(|| anyhow!("No task program configured for topic {}", task.topic))?;

        let mut cmd = Command::new(&task_command.program);
        cmd.args(&task_command.args)
            .env("RECON_WORKER_TOPIC", &task.topic)
            .env("RECON_WORKER_PERFORMANCE", self.performance.as_str())
            .env("RECON_WORKER_FORWARD_ADDR", self.forward.current())
            .env("RECON_WORKER_TEMP_DIR", &self.temp_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, task: &Task) -> Result<()> {
        let mut cmd = self.build_command(task)?;
        debug!("Running task {}: {:?}", task.id, cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start task program for {}", task.id))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that ignores its input may exit before reading it
            if let Err(e) = stdin.write_all(task.to_json()?.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).context("Failed to write task to program stdin");
                }
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Task program failed for {}: {}", task.id, stderr.trim());
            return Err(anyhow!(
                "Task {} exited with {}: {}",
                task.id,
                output.status,
                stderr.trim()
            ));
        }

        info!("Task {} ({}) finished", task.id, task.kind);
        Ok(())
    }
}
