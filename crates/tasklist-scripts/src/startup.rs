//! Startup step for processes that host the application.

use tasklist_db::{ConnectionManager, DbError};

use crate::config::Config;

/// Builds the connection manager and, for hosted deployments, applies the
/// initial schema file.
///
/// The bootstrap is best-effort: a missing or failing schema file is logged
/// and startup continues.
///
/// # Errors
///
/// Returns `DbError` only if the connection string is unusable.
pub fn prepare(config: &Config) -> Result<ConnectionManager, DbError> {
    let manager = ConnectionManager::new(&config.database.url, config.runtime_settings())?;

    if config.environment.is_production() {
        let init_file = config.migrations.bootstrap_path();
        tracing::info!(
            environment = config.environment.as_str(),
            path = %init_file.display(),
            "bootstrapping database schema"
        );
        manager.initialize_database(&init_file);
    }

    Ok(manager)
}
