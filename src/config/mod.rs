use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Where the coordinator lives and how to authenticate against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            auth_token: String::new(),
        }
    }
}

/// Task broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Root directory holding one queue directory per topic
    pub queue_root: PathBuf,
    pub poll_interval_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_root: PathBuf::from("queue"),
            poll_interval_secs: 5,
        }
    }
}

/// Upstream SOCKS5 proxies the local forward relays to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub upstreams: Vec<String>,
}

/// External program executing the tasks of one topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Timing of the background loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTuning {
    pub heartbeat_warmup_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub consumer_stagger_ms: u64,
    pub forward_start_port: u16,
    pub forward_retry_delay_ms: u64,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            heartbeat_warmup_secs: 10,
            heartbeat_interval_secs: 30,
            consumer_stagger_ms: 1000,
            forward_start_port: 5010,
            forward_retry_delay_ms: 0,
        }
    }
}

impl WorkerTuning {
    pub fn heartbeat_warmup(&self) -> Duration {
        Duration::from_secs(self.heartbeat_warmup_secs)
    }

    /// Never zero; a zero period cannot drive a ticker
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn consumer_stagger(&self) -> Duration {
        Duration::from_millis(self.consumer_stagger_ms)
    }

    pub fn forward_retry_delay(&self) -> Duration {
        Duration::from_millis(self.forward_retry_delay_ms)
    }
}

/// Worker configuration loaded from the on-disk YAML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadableConfig {
    pub coordinator: CoordinatorConfig,
    pub broker: BrokerConfig,
    pub proxy: ProxyConfig,
    /// Task programs keyed by topic; custom topics use the `custom` entry
    pub tasks: HashMap<String, TaskCommand>,
    pub worker: WorkerTuning,
}

impl ReloadableConfig {
    /// Parse a configuration document
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(anyhow!("Config document is empty"));
        }
        let config: Self =
            serde_yaml::from_str(content).context("Failed to parse worker config")?;
        if config.worker.forward_start_port == 0 {
            return Err(anyhow!("worker.forward_start_port must be a fixed port, not 0"));
        }
        Ok(config)
    }

    /// Read and parse a configuration file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        Self::from_yaml(&content)
    }

    /// Command configured for a topic
    pub fn task_command(&self, topic: &str) -> Option<&TaskCommand> {
        self.tasks.get(topic).or_else(|| {
            topic
                .split_once('.')
                .and_then(|(prefix, _)| self.tasks.get(prefix))
        })
    }
}

/// Process-wide handle to the current configuration.
///
/// Readers get an `Arc` snapshot; reloads swap the whole object under a
/// dedicated mutex so a reader never sees a half-applied update.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<SharedConfigInner>,
}

struct SharedConfigInner {
    path: PathBuf,
    current: RwLock<Arc<ReloadableConfig>>,
    reload_lock: Mutex<()>,
}

impl SharedConfig {
    pub fn new(path: PathBuf, config: ReloadableConfig) -> Self {
        Self {
            inner: Arc::new(SharedConfigInner {
                path,
                current: RwLock::new(Arc::new(config)),
                reload_lock: Mutex::new(()),
            }),
        }
    }

    /// Load the initial configuration from `path`
    pub async fn open(path: PathBuf) -> Result<Self> {
        let config = ReloadableConfig::load(&path).await?;
        Ok(Self::new(path, config))
    }

    /// Path of the watched configuration file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Snapshot of the configuration currently in effect
    pub fn current(&self) -> Arc<ReloadableConfig> {
        let guard = self
            .inner
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the file and replace the configuration.
    ///
    /// On a read or parse error the previous configuration stays in effect.
    pub async fn reload(&self) -> Result<Arc<ReloadableConfig>> {
        let _reload = self.inner.reload_lock.lock().await;

        match ReloadableConfig::load(&self.inner.path).await {
            Ok(config) => {
                let config = Arc::new(config);
                self.replace(Arc::clone(&config));
                info!("🔄 Reloaded config file: {:?}", self.inner.path);
                Ok(config)
            }
            Err(e) => {
                error!(
                    "Keeping previous config, reload of {:?} failed: {:#}",
                    self.inner.path, e
                );
                Err(e)
            }
        }
    }

    fn replace(&self, config: Arc<ReloadableConfig>) {
        let mut guard = self
            .inner
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
coordinator:
  host: 10.0.0.5
  port: 5443
  auth_token: secret
broker:
  queue_root: /var/lib/recon/queue
proxy:
  upstreams:
    - 10.0.0.9:1080
tasks:
  finger:
    program: /usr/bin/finger-task
    args: ["--json"]
  custom:
    program: /usr/bin/custom-task
worker:
  heartbeat_interval_secs: 15
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = ReloadableConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.coordinator.host, "10.0.0.5");
        assert_eq!(config.coordinator.port, 5443);
        assert_eq!(config.broker.poll_interval_secs, 5);
        assert_eq!(config.proxy.upstreams, vec!["10.0.0.9:1080"]);
        assert_eq!(config.worker.heartbeat_interval_secs, 15);
        assert_eq!(config.worker.heartbeat_warmup_secs, 10);
        assert_eq!(config.worker.forward_start_port, 5010);
    }

    #[test]
    fn test_empty_document_is_rejected() {
        assert!(ReloadableConfig::from_yaml("  \n").is_err());
        assert_eq!(
            ReloadableConfig::from_yaml("{}").unwrap(),
            ReloadableConfig::default()
        );
    }

    #[test]
    fn test_zero_heartbeat_interval_is_clamped() {
        let config = ReloadableConfig::from_yaml("worker:\n  heartbeat_interval_secs: 0\n").unwrap();
        assert_eq!(config.worker.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_forward_port_is_rejected() {
        let err = ReloadableConfig::from_yaml("worker:\n  forward_start_port: 0\n").unwrap_err();
        assert!(err.to_string().contains("forward_start_port"));
        assert!(ReloadableConfig::from_yaml("worker:\n  forward_start_port: 6000\n").is_ok());
    }

    #[test]
    fn test_task_command_lookup() {
        let config = ReloadableConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            config.task_command("finger").unwrap().program,
            "/usr/bin/finger-task"
        );
        assert_eq!(
            config
                .task_command("custom.3f2b8c1e-9d4a-4e7b-8c2f-1a2b3c4d5e6f")
                .unwrap()
                .program,
            "/usr/bin/custom-task"
        );
        assert!(config.task_command("active").is_none());
    }

    #[tokio::test]
    async fn test_reload_replaces_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("worker.yml");
        std::fs::write(&path, "coordinator:\n  port: 1000\n").unwrap();

        let shared = SharedConfig::open(path.clone()).await.unwrap();
        assert_eq!(shared.current().coordinator.port, 1000);

        std::fs::write(&path, "coordinator:\n  port: 2000\n").unwrap();
        shared.reload().await.unwrap();
        assert_eq!(shared.current().coordinator.port, 2000);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("worker.yml");
        std::fs::write(&path, "coordinator:\n  port: 1000\n").unwrap();
        let shared = SharedConfig::open(path.clone()).await.unwrap();

        std::fs::write(&path, "coordinator: [not, a, mapping").unwrap();
        assert!(shared.reload().await.is_err());
        assert_eq!(shared.current().coordinator.port, 1000);

        std::fs::remove_file(&path).unwrap();
        assert!(shared.reload().await.is_err());
        assert_eq!(shared.current().coordinator.port, 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_see_whole_configs_during_reloads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("worker.yml");
        let render = |n: u16| {
            format!(
                "coordinator:\n  host: host-{n}\n  port: {n}\nworker:\n  forward_start_port: {n}\n"
            )
        };
        std::fs::write(&path, render(1)).unwrap();
        let shared = SharedConfig::open(path.clone()).await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..4 {
            let shared = shared.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let config = shared.current();
                    let port = config.coordinator.port;
                    assert_eq!(config.coordinator.host, format!("host-{port}"));
                    assert_eq!(config.worker.forward_start_port, port);
                    tokio::task::yield_now().await;
                }
            }));
        }

        let mut reloaders = Vec::new();
        for n in 2..10u16 {
            let staged = temp_dir.path().join(format!("worker.yml.{n}"));
            std::fs::write(&staged, render(n)).unwrap();
            std::fs::rename(&staged, &path).unwrap();
            let shared = shared.clone();
            reloaders.push(tokio::spawn(async move {
                let _ = shared.reload().await;
            }));
        }

        for handle in readers.into_iter().chain(reloaders) {
            handle.await.unwrap();
        }
    }
}
