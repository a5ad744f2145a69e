use anyhow::Error as AnyError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How the worker reacts to a termination signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Log and exit; the background tasks die with the process
    Immediate,
    /// Cancel the background tasks and wait for them up to the grace period
    Graceful(Duration),
}

/// Wait for Ctrl-C or SIGTERM
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("🛑 Termination signal received, waiting for worker exit...");
}

/// Records the first fatal error and brings the worker down
#[derive(Clone)]
pub struct FatalHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    root_shutdown: CancellationToken,
    fatal: CancellationToken,
    captured_error: Mutex<Option<CapturedFatalError>>,
}

#[derive(Clone)]
struct CapturedFatalError {
    inner: Arc<AnyError>,
}

impl fmt::Debug for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapturedFatalError")
            .field(&self.inner)
            .finish()
    }
}

impl fmt::Display for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner.as_ref(), f)
    }
}

impl std::error::Error for CapturedFatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl FatalHandler {
    pub fn new(root_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                root_shutdown,
                fatal: CancellationToken::new(),
                captured_error: Mutex::new(None),
            }),
        }
    }

    /// Record `error` (only the first one is kept) and cancel the worker
    pub fn trigger(&self, context: &str, error: AnyError) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }

        error!(context, error = %format!("{error:#}"), "fatal worker error; shutting down");

        {
            let mut slot = self
                .inner
                .captured_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                *slot = Some(CapturedFatalError {
                    inner: Arc::new(error),
                });
            }
        }

        self.inner.root_shutdown.cancel();
        self.inner.fatal.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once a fatal error has been recorded
    pub async fn wait(&self) {
        self.inner.fatal.cancelled().await;
    }

    pub fn error(&self) -> Option<AnyError> {
        self.inner
            .captured_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|error| error.clone().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn test_first_error_wins_and_cancels() {
        let root = CancellationToken::new();
        let fatal = FatalHandler::new(root.clone());
        assert!(!fatal.is_triggered());
        assert!(fatal.error().is_none());

        fatal.trigger("consumer finger", anyhow!("broker unreachable"));
        fatal.trigger("consumer active", anyhow!("second failure"));

        fatal.wait().await;
        assert!(root.is_cancelled());
        assert!(fatal.is_triggered());
        assert_eq!(fatal.error().unwrap().to_string(), "broker unreachable");
    }

    #[tokio::test]
    async fn test_captured_error_keeps_its_chain() {
        let fatal = FatalHandler::new(CancellationToken::new());
        let error = anyhow!("connection refused").context("subscribe failed");
        fatal.trigger("consumer active", error);

        let captured = fatal.error().unwrap();
        assert_eq!(
            format!("{captured:#}"),
            "subscribe failed: connection refused"
        );
    }
}
