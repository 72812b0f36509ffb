//! Script configuration loading from file and environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use tasklist_db::{DbRuntimeSettings, DATABASE_URL_ENV};
use thiserror::Error;

/// Default location of the optional configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "tasklist.toml";

/// Top-level configuration shared by the scripts and hosting processes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Deployment environment.
    #[serde(default)]
    pub environment: DeployEnvironment,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration file settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the process is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployEnvironment {
    /// Local or CI use.
    #[default]
    Development,
    /// A hosted deployment.
    Production,
}

impl DeployEnvironment {
    /// Whether this is a hosted deployment.
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Lowercase name used in logs and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string: a SQLite path, `sqlite://` URL, `file:` URI or `:memory:`.
    #[serde(default = "default_db_url")]
    pub url: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// How long to wait for a connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whether a missing database file may be created. Unset means "only
    /// outside production".
    #[serde(default)]
    pub create_if_missing: Option<bool>,
}

/// Migration file configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding the `.sql` migration files.
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,

    /// File in `dir` applied by the startup bootstrap.
    #[serde(default = "default_bootstrap_file")]
    pub bootstrap_file: String,
}

impl MigrationsConfig {
    /// Full path of the bootstrap schema file.
    pub fn bootstrap_path(&self) -> PathBuf {
        self.dir.join(&self.bootstrap_file)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tasklist_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_url() -> String {
    "tasklist.db".to_string()
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_connect_timeout_ms() -> u64 {
    DbRuntimeSettings::default().connect_timeout_ms
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_bootstrap_file() -> String {
    "001_init.sql".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            pool_max_size: default_pool_max_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            create_if_missing: None,
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
            bootstrap_file: default_bootstrap_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Connection settings for [`tasklist_db::ConnectionManager::new`].
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size,
            connect_timeout_ms: self.database.connect_timeout_ms,
            create_if_missing: self
                .database
                .create_if_missing
                .unwrap_or(!self.environment.is_production()),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides using `lookup` to read variables.
///
/// - `DATABASE_URL` overrides `database.url`
/// - `TASKLIST_ENV` overrides `environment` ("production"/"prod" or anything else)
/// - `VERCEL`, when set to a non-empty value, forces `environment = production`
/// - `TASKLIST_DB_CREATE` overrides `database.create_if_missing`
/// - `TASKLIST_MIGRATIONS_DIR` overrides `migrations.dir`
/// - `TASKLIST_LOG_LEVEL` overrides `logging.level`
/// - `TASKLIST_LOG_JSON` overrides `logging.json` (set to "true" to enable)
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
        config.database.url = url;
    }
    if let Some(env) = lookup("TASKLIST_ENV") {
        config.environment = match env.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => DeployEnvironment::Production,
            _ => DeployEnvironment::Development,
        };
    }
    if lookup("VERCEL").is_some_and(|v| !v.trim().is_empty()) {
        config.environment = DeployEnvironment::Production;
    }
    if let Some(create) = lookup("TASKLIST_DB_CREATE") {
        config.database.create_if_missing = Some(is_truthy(&create));
    }
    if let Some(dir) = lookup("TASKLIST_MIGRATIONS_DIR").filter(|v| !v.trim().is_empty()) {
        config.migrations.dir = PathBuf::from(dir);
    }
    if let Some(level) = lookup("TASKLIST_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("TASKLIST_LOG_JSON") {
        config.logging.json = is_truthy(&json);
    }
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}

/// Picks the config file path: first CLI argument, then `TASKLIST_CONFIG_PATH`,
/// then [`DEFAULT_CONFIG_PATH`]. Returns the path and where it came from.
pub fn resolve_config_path() -> (String, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (path, "cli-arg");
    }

    if let Ok(path) = std::env::var("TASKLIST_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    (DEFAULT_CONFIG_PATH.to_string(), "default")
}
