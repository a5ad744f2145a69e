pub mod commands;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod executor;
pub mod heartbeat;
pub mod job;
pub mod options;
pub mod performance;
pub mod proxy;
pub mod queue;
pub mod shutdown;
pub mod status;
pub mod topic;
pub mod watcher;
pub mod worker;
