use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SharedConfig;
use crate::consumer::{Broker, ConsumerSupervisor};
use crate::coordinator::Coordinator;
use crate::executor::CommandExecutor;
use crate::heartbeat::HeartbeatManager;
use crate::options::WorkerOptions;
use crate::performance::PerformanceTier;
use crate::proxy::{ForwardListener, ForwardState, ProxyForwardLauncher, TcpForwarder};
use crate::queue::DirectoryBroker;
use crate::shutdown::FatalHandler;
use crate::status::{worker_name, StatusStore};
use crate::topic::TopicSet;
use crate::watcher::ConfigWatcher;

/// Shared state of a running worker, handed to each background task
pub struct Worker {
    pub options: WorkerOptions,
    pub topics: TopicSet,
    pub performance: PerformanceTier,
    pub config: SharedConfig,
    pub status: StatusStore,
    pub forward: ForwardState,
    pub temp_dir: PathBuf,
    pub shutdown: CancellationToken,
    pub fatal: FatalHandler,
}

impl Worker {
    pub fn new(
        options: WorkerOptions,
        topics: TopicSet,
        performance: PerformanceTier,
        config: SharedConfig,
        temp_dir: PathBuf,
    ) -> Self {
        let status = StatusStore::new(worker_name(), topics.joined(), options.to_json());
        let shutdown = CancellationToken::new();
        let fatal = FatalHandler::new(shutdown.clone());

        Self {
            options,
            topics,
            performance,
            config,
            status,
            forward: ForwardState::new(),
            temp_dir,
            shutdown,
            fatal,
        }
    }

    /// Broker serving the topic queues below the configured root
    pub fn directory_broker(&self) -> Arc<dyn Broker> {
        let executor = Arc::new(CommandExecutor::new(
            self.config.clone(),
            self.performance,
            self.forward.clone(),
            self.temp_dir.clone(),
        ));
        Arc::new(DirectoryBroker::new(
            self.config.clone(),
            executor,
            self.status.clone(),
            self.shutdown.clone(),
        ))
    }

    /// Local forward relaying to the configured SOCKS5 upstreams
    pub fn tcp_forwarder(&self) -> Arc<dyn ForwardListener> {
        Arc::new(TcpForwarder::new(self.config.clone()))
    }

    /// Spawn every background task: heartbeat, config watcher, proxy forward
    /// (unless disabled) and the topic consumers
    pub fn start(
        &self,
        coordinator: Arc<dyn Coordinator>,
        broker: Arc<dyn Broker>,
        forward_listener: Arc<dyn ForwardListener>,
    ) -> JoinSet<()> {
        let tuning = self.config.current().worker.clone();
        let mut tasks = JoinSet::new();

        let heartbeat = HeartbeatManager::new(
            coordinator,
            self.status.clone(),
            tuning.heartbeat_warmup(),
            tuning.heartbeat_interval(),
        );
        tasks.spawn(heartbeat.run(self.shutdown.clone()));

        match ConfigWatcher::new(self.config.clone()) {
            Ok(watcher) => {
                let shutdown = self.shutdown.clone();
                tasks.spawn(async move {
                    if let Err(e) = watcher.run(shutdown).await {
                        error!("Config watcher stopped: {:#}", e);
                    }
                });
            }
            Err(e) => error!("Config watcher not started: {:#}", e),
        }

        if self.options.no_proxy {
            info!("Proxy disabled, SOCKS5 forward not started");
        } else {
            let launcher = ProxyForwardLauncher::new(
                forward_listener,
                self.forward.clone(),
                tuning.forward_start_port,
                tuning.forward_retry_delay(),
            );
            tasks.spawn(launcher.run(self.shutdown.clone()));
        }

        let supervisor = ConsumerSupervisor::new(
            broker,
            self.topics.clone(),
            self.options.concurrency as usize,
            tuning.consumer_stagger(),
            self.fatal.clone(),
        );
        tasks.spawn(supervisor.run(self.shutdown.clone()));

        tasks
    }
}
