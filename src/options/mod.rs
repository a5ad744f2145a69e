use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::topic::{TopicError, TopicSet};

/// Default location of the reloadable worker configuration
pub const DEFAULT_CONFIG_FILE: &str = "conf/worker.yml";

/// Startup options; parsed once and never mutated afterwards
#[derive(Debug, Clone, Args, Serialize)]
pub struct WorkerOptions {
    /// Number of tasks each topic consumer may run in parallel
    #[arg(
        long,
        short = 'c',
        default_value_t = 3,
        env = "RECON_WORKER_CONCURRENCY",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub concurrency: u32,

    /// Worker performance (0: autodetect, 1: high, 2: normal)
    #[arg(
        long,
        short = 'p',
        default_value_t = 0,
        env = "RECON_WORKER_PERFORMANCE",
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    pub performance: u8,

    /// Run mode (0: all, 1: active, 2: finger, 3: passive, 4: pocscan, 5: custom); separate multiple modes with ","
    ///
    /// A list may only combine modes 1 to 4; "0" and "5" must be given alone,
    /// and a list containing them is rejected instead of being ignored.
    #[arg(long, short = 'm', default_value = "0", env = "RECON_WORKER_MODE")]
    pub mode: String,

    /// Workspace identifiers for the custom mode, separated by ","
    #[arg(long, short = 'w', default_value = "", env = "RECON_WORKER_WORKSPACE")]
    pub workspace: String,

    /// Use TLS when talking to the coordinator
    #[arg(long)]
    pub tls: bool,

    /// Disable the proxy configuration, including the local SOCKS5 forward
    #[arg(long = "no-proxy")]
    pub no_proxy: bool,

    /// Path to the reloadable worker configuration file
    #[arg(long = "config", short = 'f', default_value = DEFAULT_CONFIG_FILE, env = "RECON_WORKER_CONFIG")]
    pub config_file: PathBuf,

    /// Also write a diagnostic log to this file
    #[arg(long = "runtime-log", env = "RECON_WORKER_RUNTIME_LOG")]
    pub runtime_log: Option<PathBuf>,

    /// Stop background tasks cooperatively instead of exiting right away on a signal
    #[arg(long)]
    pub graceful: bool,

    /// Seconds to wait for background tasks in graceful mode
    #[arg(long = "shutdown-grace-secs", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

impl WorkerOptions {
    /// Resolve the subscribed topics from the run mode
    pub fn topics(&self) -> Result<TopicSet, TopicError> {
        TopicSet::resolve(&self.mode, &self.workspace)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// JSON blob stored in the worker status
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            performance: 0,
            mode: "0".to_string(),
            workspace: String::new(),
            tls: false,
            no_proxy: false,
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            runtime_log: None,
            graceful: false,
            shutdown_grace_secs: 5,
        }
    }
}
