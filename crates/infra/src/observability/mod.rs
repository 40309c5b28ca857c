//! Tracing initialisation
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! human-readable or a JSON layer. The filter comes from `COURIER_LOG`, then
//! `RUST_LOG`, then the level passed in.

use std::io;
use std::str::FromStr;

use courier_domain::CourierError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "COURIER_LOG";

const DEFAULT_LEVEL: &str = "info";

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "fmt" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(CourierError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Install the global subscriber, writing to stderr
///
/// Returns `Ok(false)` when a subscriber was already installed, so calling
/// this more than once is harmless.
///
/// # Errors
/// Returns `CourierError::Config` when the filter directives do not parse.
pub fn init_tracing(format: LogFormat) -> Result<bool, CourierError> {
    let filter = env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(io::stderr)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(io::stderr)).try_init(),
    };
    Ok(installed.is_ok())
}

fn env_filter() -> Result<EnvFilter, CourierError> {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    EnvFilter::try_new(&directives).map_err(|e| CourierError::Config(format!("invalid log filter '{directives}': {e}")))
}
