//! TOML configuration file parsing
//!
//! ```toml
//! [master]
//! worker_port = 8000
//! client_port = 8001
//! acquire_timeout_ms = 30000
//!
//! [worker]
//! master_address = "10.0.0.1:8000"
//!
//! [logging]
//! level = "debug"
//! ```

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the config file named on the command line (if any) and apply CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Master overrides
    if let Some(bind) = &cli.bind {
        config.master.bind_address = bind.clone();
    }
    if let Some(port) = cli.worker_port {
        config.master.worker_port = port;
    }
    if let Some(port) = cli.client_port {
        config.master.client_port = port;
    }
    if let Some(secs) = cli.acquire_timeout {
        config.master.acquire_timeout_ms = secs
            .checked_mul(1000)
            .context("acquire_timeout is too large")?;
    }
    if let Some(ms) = cli.round_timeout_ms {
        config.master.round_timeout_ms = Some(ms);
    }

    // Worker overrides
    if let Some(master) = &cli.master {
        config.worker.master_address = master.clone();
    }
    if cli.no_reconnect {
        config.worker.reconnect = false;
    }

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}
