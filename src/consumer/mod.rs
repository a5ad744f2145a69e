use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::shutdown::FatalHandler;
use crate::topic::TopicSet;

/// Message broker a worker consumes tasks from
#[async_trait]
pub trait Broker: Send + Sync {
    /// Subscribe to `topic` and process its tasks with up to `concurrency`
    /// in flight.
    ///
    /// Returns an error straight away when the subscription fails; otherwise
    /// runs until the worker shuts down.
    async fn consume(&self, topic: &str, concurrency: usize) -> Result<()>;
}

/// Launches one consumer per subscribed topic
pub struct ConsumerSupervisor {
    broker: Arc<dyn Broker>,
    topics: TopicSet,
    concurrency: usize,
    stagger: Duration,
    fatal: FatalHandler,
}

impl ConsumerSupervisor {
    pub fn new(
        broker: Arc<dyn Broker>,
        topics: TopicSet,
        concurrency: usize,
        stagger: Duration,
        fatal: FatalHandler,
    ) -> Self {
        Self {
            broker,
            topics,
            concurrency,
            stagger,
            fatal,
        }
    }

    /// Start the consumers one `stagger` apart and wait for all of them.
    ///
    /// A consumer error is fatal to the whole worker.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut consumers: Vec<JoinHandle<()>> = Vec::with_capacity(self.topics.len());

        for (index, topic) in self.topics.iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.stagger) => {}
                }
            }
            consumers.push(self.spawn_consumer(topic.to_string(), shutdown.clone()));
        }

        for consumer in consumers {
            if let Err(e) = consumer.await {
                error!("Consumer task panicked: {}", e);
            }
        }
    }

    fn spawn_consumer(&self, topic: String, shutdown: CancellationToken) -> JoinHandle<()> {
        let broker = Arc::clone(&self.broker);
        let fatal = self.fatal.clone();
        let concurrency = self.concurrency;

        info!("🚀 Starting consumer for topic {}", topic);
        tokio::spawn(async move {
            match broker.consume(&topic, concurrency).await {
                Ok(()) if shutdown.is_cancelled() => {}
                Ok(()) => warn!("Consumer for topic {} ended unexpectedly", topic),
                Err(e) => {
                    error!("Consumer for topic {} failed: {:#}", topic, e);
                    fatal.trigger(&format!("consumer {topic}"), e);
                }
            }
        })
    }
}
