//! Configuration validation

use super::*;
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_master(&config.master)?;
    validate_worker(&config.worker)?;
    validate_logging(&config.logging)?;

    Ok(())
}

/// Validate master configuration
pub fn validate_master(master: &MasterConfig) -> Result<()> {
    if master.bind_address.trim().is_empty() {
        anyhow::bail!("bind_address must not be empty");
    }

    if master.worker_port == master.client_port && master.worker_port != 0 {
        anyhow::bail!(
            "worker_port and client_port must differ (both {})",
            master.worker_port
        );
    }

    if master.pool_poll_interval_ms == 0 {
        anyhow::bail!("pool_poll_interval_ms must be at least 1");
    }

    if master.liveness_interval_ms == 0 {
        anyhow::bail!("liveness_interval_ms must be at least 1");
    }

    if master.scheduler_idle_ms == 0 {
        anyhow::bail!("scheduler_idle_ms must be at least 1");
    }

    // A wait shorter than one poll would never see a worker arrive
    if master.acquire_timeout_ms < master.pool_poll_interval_ms {
        anyhow::bail!(
            "acquire_timeout_ms ({}) must be at least pool_poll_interval_ms ({})",
            master.acquire_timeout_ms,
            master.pool_poll_interval_ms
        );
    }

    if master.round_timeout_ms == Some(0) {
        anyhow::bail!("round_timeout_ms must be at least 1 when set");
    }

    Ok(())
}

/// Validate worker node configuration
pub fn validate_worker(worker: &WorkerNodeConfig) -> Result<()> {
    let (host, port) = worker
        .master_address
        .rsplit_once(':')
        .with_context(|| format!("master_address '{}' must be host:port", worker.master_address))?;
    if host.is_empty() {
        anyhow::bail!("master_address '{}' has an empty host", worker.master_address);
    }
    port.parse::<u16>()
        .with_context(|| format!("master_address '{}' has an invalid port", worker.master_address))?;

    if worker.reconnect_delay_ms == 0 {
        anyhow::bail!("reconnect_delay_ms must be at least 1");
    }

    if worker.max_reconnect_delay_ms < worker.reconnect_delay_ms {
        anyhow::bail!(
            "max_reconnect_delay_ms ({}) must not be below reconnect_delay_ms ({})",
            worker.max_reconnect_delay_ms,
            worker.reconnect_delay_ms
        );
    }

    Ok(())
}

/// Validate logging configuration
pub fn validate_logging(logging: &LoggingConfig) -> Result<()> {
    EnvFilter::try_new(&logging.level)
        .with_context(|| format!("invalid log level '{}'", logging.level))?;
    Ok(())
}
