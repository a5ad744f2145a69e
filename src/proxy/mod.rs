use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SharedConfig;

/// Address of the local forward listener; one writer, any number of readers
#[derive(Clone)]
pub struct ForwardState {
    tx: Arc<watch::Sender<String>>,
}

impl ForwardState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the published address
    pub fn publish(&self, addr: String) {
        self.tx.send_replace(addr);
    }

    /// Currently published address; empty when no forward runs
    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for ForwardState {
    fn default() -> Self {
        Self::new()
    }
}

/// Local listener relaying outbound traffic
#[async_trait]
pub trait ForwardListener: Send + Sync {
    /// Serve on `addr` until `shutdown` fires.
    ///
    /// A failure to listen is reported through `failed` after the socket has
    /// been released.
    async fn serve(
        &self,
        addr: String,
        failed: oneshot::Sender<io::Error>,
        shutdown: CancellationToken,
    );
}

/// TCP relay from the local address to the configured SOCKS5 upstreams
pub struct TcpForwarder {
    config: SharedConfig,
    next_upstream: AtomicUsize,
}

impl TcpForwarder {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            next_upstream: AtomicUsize::new(0),
        }
    }

    /// Round-robin over the upstreams of the current configuration
    fn pick_upstream(&self) -> Option<String> {
        let config = self.config.current();
        let upstreams = &config.proxy.upstreams;
        if upstreams.is_empty() {
            return None;
        }
        let index = self.next_upstream.fetch_add(1, Ordering::Relaxed) % upstreams.len();
        Some(upstreams[index].clone())
    }

    async fn relay(mut inbound: TcpStream, upstream: String) -> io::Result<()> {
        let mut outbound = TcpStream::connect(&upstream).await?;
        let (sent, received) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
        debug!(
            "Forward to {} closed ({} bytes out, {} bytes in)",
            upstream, sent, received
        );
        Ok(())
    }
}

#[async_trait]
impl ForwardListener for TcpForwarder {
    async fn serve(
        &self,
        addr: String,
        failed: oneshot::Sender<io::Error>,
        shutdown: CancellationToken,
    ) {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = failed.send(e);
                return;
            }
        };
        info!("🔀 SOCKS5 forward listening on {}", addr);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((inbound, peer)) => match self.pick_upstream() {
                    Some(upstream) => {
                        tokio::spawn(async move {
                            if let Err(e) = Self::relay(inbound, upstream.clone()).await {
                                debug!("Forward from {} to {} failed: {}", peer, upstream, e);
                            }
                        });
                    }
                    None => warn!("No SOCKS5 upstream configured, dropping connection from {}", peer),
                },
                Err(e) => warn!("Forward accept on {} failed: {}", addr, e),
            }
        }

        // Held until the listener ends
        drop(failed);
    }
}

/// Starts the forward listener, moving to the next port whenever one is taken
pub struct ProxyForwardLauncher {
    listener: Arc<dyn ForwardListener>,
    state: ForwardState,
    start_port: u16,
    retry_delay: Duration,
}

impl ProxyForwardLauncher {
    pub fn new(
        listener: Arc<dyn ForwardListener>,
        state: ForwardState,
        start_port: u16,
        retry_delay: Duration,
    ) -> Self {
        Self {
            listener,
            state,
            start_port,
            retry_delay,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut port = self.start_port;

        loop {
            let addr = format!("127.0.0.1:{port}");
            self.state.publish(addr.clone());

            let (failed_tx, failed_rx) = oneshot::channel();
            let listener = Arc::clone(&self.listener);
            let serve_shutdown = shutdown.clone();
            tokio::spawn(async move { listener.serve(addr, failed_tx, serve_shutdown).await });

            let failure = tokio::select! {
                _ = shutdown.cancelled() => return,
                failure = failed_rx => failure,
            };

            match failure {
                Ok(e) => {
                    warn!("SOCKS5 forward could not listen on port {}: {}", port, e);
                    port = match port.checked_add(1) {
                        Some(next) => next,
                        None => {
                            error!("No local port left for the SOCKS5 forward");
                            self.state.publish(String::new());
                            return;
                        }
                    };
                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
                // The listener ended without reporting a failure
                Err(_) => return,
            }
        }
    }
}
