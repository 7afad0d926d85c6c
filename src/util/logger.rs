//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt layer on stdout. `RUST_LOG` directives
//! are applied on top of the configured level.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::io::IsTerminal;
use tracing_subscriber::{
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    EnvFilter, Layer,
};

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"))
    }
}

/// Install the global subscriber; call once at startup
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("invalid log level '{}'", config.level))?;
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) if !env.trim().is_empty() => {
            let mut filter = filter;
            for directive in env.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(
                    directive
                        .parse()
                        .with_context(|| format!("invalid RUST_LOG directive '{}'", directive))?,
                );
            }
            filter
        }
        _ => filter,
    };

    let stdout = fmt::Layer::new()
        .with_ansi(std::io::stdout().is_terminal())
        .with_timer(LocalTimer)
        .with_target(true)
        .with_writer(std::io::stdout)
        .with_file(false)
        .with_filter(filter);

    let subscriber = tracing_subscriber::registry().with(stdout);
    tracing::subscriber::set_global_default(subscriber).context("failed to install logger")?;
    Ok(())
}

/// Log an `Err` result at error level and otherwise ignore it
#[macro_export]
macro_rules! log_if_err {
    ($run:expr) => {
        $crate::log_if_err!($run, stringify!($run))
    };

    ($run:expr, $msg:expr $(,)?) => {
        if let Err(err) = $run {
            ::tracing::error!(?err, concat!("FAILED: ", $msg))
        }
    };
}
