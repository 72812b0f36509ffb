//! Database reachability and diagnostics.
//!
//! [`run_health_check`] runs three checks in order. Only the first one, the
//! connectivity probe, can fail the check; the schema inventory and the row
//! counts degrade to [`HealthWarning`]s.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::DbError;
use crate::pool::ConnectionManager;
use crate::DATABASE_URL_ENV;

/// Domain tables whose row counts are sampled.
pub const SAMPLE_TABLES: [&str; 3] = ["cars", "mechanics", "tasks"];

/// The health check could not reach the database.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The connectivity probe failed.
    #[error("database health check failed: {source}")]
    Connectivity {
        /// The underlying database error.
        source: DbError,
    },
}

impl HealthError {
    /// The SQLite error code, when the client reported one.
    pub fn code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            Self::Connectivity { source } => source.code(),
        }
    }

    /// A remediation hint for common connection failures.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Connectivity { source } => connection_hint(source),
        }
    }
}

/// Returns a hint pointing at the connection string for errors that mean the
/// database could not be reached at all.
pub fn connection_hint(error: &DbError) -> Option<String> {
    error
        .is_connectivity()
        .then(|| format!("Check your {DATABASE_URL_ENV} environment variable"))
}

/// A non-fatal finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthWarning {
    /// The database has no user tables.
    NoTables,
    /// The table inventory query failed.
    TableListingFailed(String),
    /// The sample tables could not be counted, usually because they do not exist yet.
    CountsUnavailable(String),
}

impl fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTables => write!(f, "no tables found, run migrations first"),
            Self::TableListingFailed(err) => write!(f, "could not list tables: {err}"),
            Self::CountsUnavailable(_) => {
                write!(f, "could not query tables (they may not exist yet)")
            }
        }
    }
}

/// Row count of one sample table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCount {
    /// One of [`SAMPLE_TABLES`].
    pub table: &'static str,
    /// Number of rows in the table.
    pub rows: i64,
}

/// Result of a successful health check.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Server clock at probe time.
    pub server_time: String,
    /// Engine name and version.
    pub server_version: String,
    /// Round trip of the connectivity probe, including connection checkout.
    pub latency: Duration,
    /// User tables, ordered by name.
    pub tables: Vec<String>,
    /// Sample table counts, if they could be read.
    pub counts: Option<Vec<TableCount>>,
    /// Non-fatal findings from the inventory and count checks.
    pub warnings: Vec<HealthWarning>,
}

/// Probes the database and collects diagnostics.
///
/// # Errors
///
/// Returns `HealthError::Connectivity` if the connectivity probe fails.
/// Failures of the later checks are reported as warnings instead.
pub fn run_health_check(manager: &ConnectionManager) -> Result<HealthReport, HealthError> {
    let started = Instant::now();
    let probe = manager
        .query(
            "SELECT datetime('now') AS server_time, 'SQLite ' || sqlite_version() AS server_version",
            [],
        )
        .map_err(|source| HealthError::Connectivity { source })?;
    let latency = started.elapsed();

    let (server_time, server_version) = probe
        .rows
        .first()
        .map(|row| {
            (
                row.get_text("server_time").unwrap_or_default().to_string(),
                row.get_text("server_version").unwrap_or_default().to_string(),
            )
        })
        .unwrap_or_default();

    tracing::debug!(latency_ms = latency.as_millis() as u64, "connectivity probe succeeded");

    let mut warnings = Vec::new();
    let tables = match list_tables(manager) {
        Ok(tables) => {
            if tables.is_empty() {
                warnings.push(HealthWarning::NoTables);
            }
            tables
        }
        Err(err) => {
            warnings.push(HealthWarning::TableListingFailed(err.to_string()));
            Vec::new()
        }
    };

    let counts = match count_sample_tables(manager) {
        Ok(counts) => Some(counts),
        Err(err) => {
            tracing::debug!(error = %err, "sample table counts unavailable");
            warnings.push(HealthWarning::CountsUnavailable(err.to_string()));
            None
        }
    };

    Ok(HealthReport {
        server_time,
        server_version,
        latency,
        tables,
        counts,
        warnings,
    })
}

fn list_tables(manager: &ConnectionManager) -> Result<Vec<String>, DbError> {
    let result = manager.query(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
        [],
    )?;

    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.get_text("name").map(str::to_owned))
        .collect())
}

fn count_sample_tables(manager: &ConnectionManager) -> Result<Vec<TableCount>, DbError> {
    SAMPLE_TABLES
        .iter()
        .map(|&table| -> Result<TableCount, DbError> {
            // Table names come from the fixed list above, never from input.
            let result = manager.query(&format!("SELECT COUNT(*) AS count FROM {table}"), [])?;
            let rows = result
                .rows
                .first()
                .and_then(|row| row.get_i64("count"))
                .unwrap_or(0);
            Ok(TableCount { table, rows })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbRuntimeSettings;

    fn memory_manager() -> ConnectionManager {
        ConnectionManager::new(":memory:", DbRuntimeSettings::default())
            .expect("manager creation should succeed")
    }

    #[test]
    fn empty_database_reports_warnings_not_errors() {
        let manager = memory_manager();

        let report = run_health_check(&manager).expect("health check should succeed");
        assert!(report.server_version.starts_with("SQLite "));
        assert!(!report.server_time.is_empty());
        assert!(report.tables.is_empty());
        assert!(report.counts.is_none());
        assert_eq!(report.warnings[0], HealthWarning::NoTables);
        assert!(matches!(
            report.warnings[1],
            HealthWarning::CountsUnavailable(_)
        ));
    }

    #[test]
    fn counts_sample_tables_when_present() {
        let manager = memory_manager();
        manager
            .exec(
                "CREATE TABLE mechanics (id INTEGER PRIMARY KEY);
                 CREATE TABLE cars (id INTEGER PRIMARY KEY);
                 CREATE TABLE tasks (id INTEGER PRIMARY KEY);
                 INSERT INTO cars DEFAULT VALUES;
                 INSERT INTO cars DEFAULT VALUES;
                 INSERT INTO tasks DEFAULT VALUES;",
            )
            .expect("setup should succeed");

        let report = run_health_check(&manager).expect("health check should succeed");
        assert_eq!(report.tables, ["cars", "mechanics", "tasks"]);
        assert!(report.warnings.is_empty());
        assert_eq!(
            report.counts.expect("counts should be present"),
            [
                TableCount { table: "cars", rows: 2 },
                TableCount { table: "mechanics", rows: 0 },
                TableCount { table: "tasks", rows: 1 },
            ]
        );
    }

    #[test]
    fn partial_schema_downgrades_counts_to_warning() {
        let manager = memory_manager();
        manager
            .exec("CREATE TABLE cars (id INTEGER PRIMARY KEY);")
            .expect("setup should succeed");

        let report = run_health_check(&manager).expect("health check should succeed");
        assert_eq!(report.tables, ["cars"]);
        assert!(report.counts.is_none());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(
            report.warnings[0].to_string(),
            "could not query tables (they may not exist yet)"
        );
    }

    #[test]
    fn unreachable_database_fails_with_hint() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("missing-dir").join("tasks.db");
        let settings = DbRuntimeSettings {
            connect_timeout_ms: 200,
            ..DbRuntimeSettings::default()
        };
        let manager = ConnectionManager::new(path.to_str().unwrap(), settings)
            .expect("manager creation should succeed");

        let err = run_health_check(&manager).expect_err("connectivity check should fail");
        let hint = err.hint().expect("connectivity failures carry a hint");
        assert!(hint.contains("DATABASE_URL"), "unexpected hint: {hint}");
        assert_eq!(
            err.code(),
            Some(rusqlite::ErrorCode::CannotOpen),
            "pool timeouts should carry the last open failure's code"
        );
    }
}
