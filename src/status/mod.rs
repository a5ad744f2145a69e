use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use sysinfo::{System, SystemExt};

/// Liveness record reported to the coordinator
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkerStatus {
    pub worker_name: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    /// Comma-joined subscribed topics
    pub worker_topics: String,
    /// JSON of the startup options
    pub worker_run_option: String,
    pub task_executed: u64,
    pub task_failed: u64,
}

/// Name identifying this worker process: `<hostname>@<pid>`
pub fn worker_name() -> String {
    let host = System::new()
        .host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}@{}", host, std::process::id())
}

/// Shared, mutex-guarded worker status
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<Mutex<WorkerStatus>>,
}

impl StatusStore {
    pub fn new(worker_name: String, worker_topics: String, worker_run_option: String) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(Mutex::new(WorkerStatus {
                worker_name,
                create_time: now,
                update_time: now,
                worker_topics,
                worker_run_option,
                task_executed: 0,
                task_failed: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerStatus> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current status
    pub fn snapshot(&self) -> WorkerStatus {
        self.lock().clone()
    }

    /// Refresh the update time and return the resulting status
    pub fn touch(&self) -> WorkerStatus {
        let mut status = self.lock();
        status.update_time = Utc::now();
        status.clone()
    }

    /// Count a finished task
    pub fn record_task(&self, success: bool) {
        let mut status = self.lock();
        status.task_executed += 1;
        if !success {
            status.task_failed += 1;
        }
    }
}
