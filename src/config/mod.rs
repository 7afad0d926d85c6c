//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Precedence, lowest to highest: built-in defaults, TOML file, CLI flags.

pub mod cli;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub worker: WorkerNodeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Master process settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterConfig {
    /// Address both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port workers connect to
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,
    /// Port the client connects to
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    /// How long a distributed job waits for workers
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Poll interval while waiting for workers
    #[serde(default = "default_pool_poll_interval_ms")]
    pub pool_poll_interval_ms: u64,
    /// Period of the background liveness sweep
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    /// Scheduler sleep when the queue is empty
    #[serde(default = "default_scheduler_idle_ms")]
    pub scheduler_idle_ms: u64,
    /// Per-round receive deadline for partial results (unbounded when unset)
    #[serde(default)]
    pub round_timeout_ms: Option<u64>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            worker_port: default_worker_port(),
            client_port: default_client_port(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            pool_poll_interval_ms: default_pool_poll_interval_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            scheduler_idle_ms: default_scheduler_idle_ms(),
            round_timeout_ms: None,
        }
    }
}

impl MasterConfig {
    pub fn worker_listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.worker_port)
    }

    pub fn client_listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.client_port)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn pool_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pool_poll_interval_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn scheduler_idle(&self) -> Duration {
        Duration::from_millis(self.scheduler_idle_ms)
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_ms.map(Duration::from_millis)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_worker_port() -> u16 {
    8000
}

fn default_client_port() -> u16 {
    8001
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_pool_poll_interval_ms() -> u64 {
    200
}

fn default_liveness_interval_ms() -> u64 {
    1_000
}

fn default_scheduler_idle_ms() -> u64 {
    500
}

/// Worker node settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNodeConfig {
    /// Master worker-port address (host:port)
    #[serde(default = "default_master_address")]
    pub master_address: String,
    /// Reconnect after the master drops the connection
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    /// First reconnect delay
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Upper bound for the growing reconnect delay
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
}

impl Default for WorkerNodeConfig {
    fn default() -> Self {
        Self {
            master_address: default_master_address(),
            reconnect: default_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
        }
    }
}

fn default_master_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    20_000
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
