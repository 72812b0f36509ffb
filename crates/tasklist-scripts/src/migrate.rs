//! The `run-migrations` script.

use tasklist_db::{
    connection_hint, run_migrations, ConnectionManager, DbError, MigrationError, MigrationReport,
};
use thiserror::Error;

use crate::config::Config;
use crate::ScriptStatus;

/// Errors that fail a migration run.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The connection string is unusable.
    #[error(transparent)]
    Connect(#[from] DbError),

    /// The run itself failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl MigrateError {
    fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Connect(err) => Some(err),
            Self::Migration(err) => err.db_error(),
        }
    }
}

/// Connects, applies pending migrations, and closes the pool.
///
/// # Errors
///
/// Returns `MigrateError` if the manager cannot be built or any migration
/// step fails.
pub fn migrate(config: &Config) -> Result<MigrationReport, MigrateError> {
    let manager = ConnectionManager::new(&config.database.url, config.runtime_settings())?;

    let result = run_migrations(&manager, &config.migrations.dir);
    manager.close();
    Ok(result?)
}

/// Runs the migrations and logs the outcome.
pub fn run(config: &Config) -> ScriptStatus {
    tracing::info!(dir = %config.migrations.dir.display(), "running database migrations");

    match migrate(config) {
        Ok(report) => {
            tracing::info!(
                applied = report.applied_count(),
                skipped = report.skipped.len(),
                "migration run finished"
            );
            ScriptStatus::Success
        }
        Err(err) => {
            tracing::error!(error = %err, "migration process failed");
            if let Some(hint) = err.db_error().and_then(connection_hint) {
                tracing::error!("{hint}");
            }
            ScriptStatus::Failure
        }
    }
}
