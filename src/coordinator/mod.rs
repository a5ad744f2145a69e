use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::CoordinatorConfig;
use crate::status::WorkerStatus;

/// Transport timeout for every coordinator request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side of the coordinator protocol
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Push the worker status; an error means the coordinator did not acknowledge it
    async fn heartbeat(&self, status: &WorkerStatus) -> Result<()>;

    /// Download the worker configuration document
    async fn fetch_config(&self) -> Result<Vec<u8>>;
}

/// Coordinator reached over HTTP(S) with JSON bodies
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpCoordinator {
    pub fn new(config: &CoordinatorConfig, tls: bool) -> Result<Self> {
        let scheme = if tls { "https" } else { "http" };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build coordinator HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("{}://{}:{}", scheme, config.host, config.port),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if self.auth_token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.auth_token)
        }
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn heartbeat(&self, status: &WorkerStatus) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/api/worker/keepalive")
            .json(status)
            .send()
            .await
            .context("Keep alive request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Keep alive rejected with {}", response.status()));
        }
        debug!("Keep alive acknowledged for {}", status.worker_name);
        Ok(())
    }

    async fn fetch_config(&self) -> Result<Vec<u8>> {
        let response = self
            .request(reqwest::Method::GET, "/api/worker/config")
            .send()
            .await
            .context("Config request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("Config request rejected with {}", response.status()));
        }
        let body = response
            .bytes()
            .await
            .context("Failed to read config body")?;
        Ok(body.to_vec())
    }
}

/// Download the configuration into `path` when no local file exists yet.
///
/// Returns `true` when a file was written.
pub async fn bootstrap_config(coordinator: &dyn Coordinator, path: &Path) -> Result<bool> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(false);
    }

    info!("📥 Config file {:?} not found, fetching it from the coordinator", path);
    let content = coordinator.fetch_config().await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create config directory {parent:?}"))?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write config file {path:?}"))?;
    Ok(true)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory coordinator recording every heartbeat
    #[derive(Default)]
    pub(crate) struct RecordingCoordinator {
        pub heartbeats: Mutex<Vec<WorkerStatus>>,
        pub fail_heartbeats: AtomicUsize,
        pub config: Vec<u8>,
    }

    #[async_trait]
    impl Coordinator for RecordingCoordinator {
        async fn heartbeat(&self, status: &WorkerStatus) -> Result<()> {
            self.heartbeats.lock().unwrap().push(status.clone());
            let remaining = self.fail_heartbeats.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_heartbeats.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("coordinator unreachable"));
            }
            Ok(())
        }

        async fn fetch_config(&self) -> Result<Vec<u8>> {
            Ok(self.config.clone())
        }
    }

    #[test]
    fn test_base_url_scheme() {
        let config = CoordinatorConfig::default();
        let plain = HttpCoordinator::new(&config, false).unwrap();
        assert_eq!(plain.base_url(), "http://127.0.0.1:5001");
        let secure = HttpCoordinator::new(&config, true).unwrap();
        assert_eq!(secure.base_url(), "https://127.0.0.1:5001");
    }

    #[tokio::test]
    async fn test_bootstrap_writes_missing_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("worker.yml");
        let coordinator = RecordingCoordinator {
            config: b"coordinator:\n  port: 7000\n".to_vec(),
            ..Default::default()
        };

        assert!(bootstrap_config(&coordinator, &path).await.unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "coordinator:\n  port: 7000\n"
        );

        // An existing file is left alone
        assert!(!bootstrap_config(&coordinator, &path).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_to_unreachable_coordinator_fails() {
        let config = CoordinatorConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            auth_token: "token".to_string(),
        };
        let coordinator = HttpCoordinator::new(&config, false).unwrap();
        let status = crate::status::StatusStore::new(
            "w@1".to_string(),
            "active".to_string(),
            "{}".to_string(),
        )
        .snapshot();
        assert!(coordinator.heartbeat(&status).await.is_err());
    }
}
