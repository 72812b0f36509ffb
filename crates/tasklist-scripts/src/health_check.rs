//! The `health-check` script.

use tasklist_db::{
    run_health_check, ConnectionManager, DbRuntimeSettings, HealthError, HealthReport,
};

use crate::config::Config;
use crate::ScriptStatus;

/// Connects, runs the health check, and closes the pool.
///
/// The check never creates the database file, whatever the environment, so a
/// mistyped `DATABASE_URL` fails instead of reporting a fresh empty database.
///
/// # Errors
///
/// Returns `HealthError::Connectivity` if the database cannot be reached or
/// the connection string is unusable.
pub fn check(config: &Config) -> Result<HealthReport, HealthError> {
    let settings = DbRuntimeSettings {
        create_if_missing: false,
        ..config.runtime_settings()
    };
    let manager = ConnectionManager::new(&config.database.url, settings)
        .map_err(|source| HealthError::Connectivity { source })?;

    let result = run_health_check(&manager);
    manager.close();
    result
}

/// Runs the health check and logs the outcome.
pub fn run(config: &Config) -> ScriptStatus {
    tracing::info!("checking database connection");

    match check(config) {
        Ok(report) => {
            log_report(&report);
            ScriptStatus::Success
        }
        Err(err) => {
            tracing::error!(error = %err, "database health check failed");
            if let Some(code) = err.code() {
                tracing::error!(code = ?code, "error code");
            }
            if let Some(hint) = err.hint() {
                tracing::error!("{hint}");
            }
            ScriptStatus::Failure
        }
    }
}

fn log_report(report: &HealthReport) {
    tracing::info!(
        server_time = %report.server_time,
        version = %report.server_version,
        latency_ms = report.latency.as_millis() as u64,
        "database connection successful"
    );

    if !report.tables.is_empty() {
        tracing::info!(tables = ?report.tables, "tables found");
    }

    if let Some(counts) = &report.counts {
        for count in counts {
            tracing::info!(table = count.table, rows = count.rows, "data summary");
        }
    }

    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }

    tracing::info!("health check completed successfully");
}
