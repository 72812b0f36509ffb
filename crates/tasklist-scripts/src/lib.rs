//! Operational scripts for the tasklist database.
//!
//! The `health-check` and `run-migrations` binaries are thin wrappers over
//! [`health_check::run`] and [`migrate::run`]. Hosting processes use
//! [`startup::prepare`] to build their connection manager.

pub mod config;
pub mod health_check;
pub mod migrate;
pub mod startup;

use std::process::ExitCode;

use config::{Config, ConfigError, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Final status of a script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    /// The script did its work; exit 0.
    Success,
    /// The script failed; exit 1.
    Failure,
}

impl From<ScriptStatus> for ExitCode {
    fn from(status: ScriptStatus) -> Self {
        match status {
            ScriptStatus::Success => ExitCode::SUCCESS,
            ScriptStatus::Failure => ExitCode::FAILURE,
        }
    }
}

/// Loads the configuration for a script binary and installs tracing.
///
/// # Errors
///
/// Returns `ConfigError` if the selected file exists but is unreadable or malformed.
pub fn init_script() -> Result<Config, ConfigError> {
    let (path, source) = config::resolve_config_path();
    let config = config::load_config(Some(&path))?;
    init_tracing(&config.logging);
    tracing::debug!(
        source,
        path = %path,
        environment = config.environment.as_str(),
        "resolved configuration"
    );
    Ok(config)
}

/// Installs the global tracing subscriber.
///
/// Falls back to `info` if the configured filter does not parse. Calling this
/// more than once keeps the first subscriber.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(error) = result {
        tracing::debug!(%error, "tracing subscriber already installed");
    }
}
