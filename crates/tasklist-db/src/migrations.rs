//! Forward-only SQL migration runner.
//!
//! Migrations are plain `.sql` files read from a directory at run time and
//! applied in filename order. Each applied file is recorded in the
//! `migrations` ledger table, so it runs exactly once. A file's SQL and its
//! ledger record commit together; there is no rollback of earlier files.
//!
//! Files that manage their own transaction (`BEGIN` ... `COMMIT`) run as
//! written on a single connection, and their ledger record is inserted once
//! the file has committed.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::DbError;
use crate::pool::ConnectionManager;

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL UNIQUE,
    executed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);";

/// A migration file discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, which is also the ledger key.
    pub filename: String,
    /// Full path to the file.
    pub path: PathBuf,
}

/// A row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// File name of the applied migration.
    pub filename: String,
    /// When it was applied, as `YYYY-MM-DD HH:MM:SS` UTC.
    pub executed_at: String,
}

/// What a single run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Files applied in this run, in application order.
    pub applied: Vec<String>,
    /// Files skipped because the ledger already had them.
    pub skipped: Vec<String>,
}

impl MigrationReport {
    /// Number of migrations applied in this run.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// True when nothing needed to be applied.
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Errors that can occur during a migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The ledger table could not be created or read.
    #[error("failed to access migration ledger: {0}")]
    Ledger(#[source] DbError),

    /// The migrations directory could not be listed.
    #[error("failed to list migrations in {}: {source}", .dir.display())]
    Discover {
        /// The directory being listed.
        dir: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A migration file could not be read.
    #[error("failed to read migration {}: {source}", .path.display())]
    Read {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A migration's SQL or its ledger insert failed.
    #[error("migration '{filename}' failed: {source}")]
    ExecutionFailed {
        /// The file that failed.
        filename: String,
        /// The underlying database error.
        source: DbError,
    },

    /// A self-managed migration ended without committing or rolling back.
    #[error("migration '{filename}' left its transaction open; end it with COMMIT or ROLLBACK")]
    OpenTransaction {
        /// The file that failed.
        filename: String,
    },
}

impl MigrationError {
    /// The database error behind this failure, if there is one.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::Ledger(source) | Self::ExecutionFailed { source, .. } => Some(source),
            Self::Discover { .. } | Self::Read { .. } | Self::OpenTransaction { .. } => None,
        }
    }
}

/// Lists the `.sql` files in `dir`, sorted by file name.
///
/// # Errors
///
/// Returns `MigrationError::Discover` if the directory cannot be read.
pub fn discover_migrations(dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    let discover_err = |source: io::Error| MigrationError::Discover {
        dir: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(discover_err)? {
        let path = entry.map_err(discover_err)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !filename.ends_with(".sql") {
            continue;
        }
        files.push(MigrationFile {
            filename: filename.to_string(),
            path,
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

/// Applies every pending migration in `dir`.
///
/// Files already in the ledger are skipped. The first failure stops the run:
/// files applied before it stay applied, later files are not attempted.
///
/// # Errors
///
/// Returns `MigrationError` if the ledger cannot be accessed, the directory
/// or a file cannot be read, or a migration fails to execute.
pub fn run_migrations(
    manager: &ConnectionManager,
    dir: &Path,
) -> Result<MigrationReport, MigrationError> {
    manager.exec(LEDGER_DDL).map_err(MigrationError::Ledger)?;

    let files = discover_migrations(dir)?;
    let mut report = MigrationReport::default();

    if files.is_empty() {
        tracing::info!(dir = %dir.display(), "no migration files found");
        return Ok(report);
    }

    let executed: HashSet<String> = manager
        .query("SELECT filename FROM migrations", [])
        .map_err(MigrationError::Ledger)?
        .rows
        .iter()
        .filter_map(|row| row.get_text("filename").map(str::to_owned))
        .collect();

    for file in files {
        if executed.contains(&file.filename) {
            tracing::info!(migration = %file.filename, "skipping migration, already executed");
            report.skipped.push(file.filename);
            continue;
        }

        tracing::info!(migration = %file.filename, "running migration");

        let sql = fs::read_to_string(&file.path).map_err(|source| MigrationError::Read {
            path: file.path.clone(),
            source,
        })?;

        if let Err(err) = apply(manager, &file.filename, &sql) {
            tracing::error!(migration = %file.filename, error = %err, "migration failed");
            return Err(err);
        }

        tracing::info!(migration = %file.filename, "migration completed");
        report.applied.push(file.filename);
    }

    if report.is_up_to_date() {
        tracing::info!("all migrations are up to date");
    } else {
        tracing::info!(count = report.applied_count(), "applied migrations");
    }

    Ok(report)
}

/// Returns the ledger contents in application order.
///
/// # Errors
///
/// Returns `MigrationError::Ledger` if the ledger cannot be read.
pub fn applied_migrations(
    manager: &ConnectionManager,
) -> Result<Vec<MigrationRecord>, MigrationError> {
    manager.exec(LEDGER_DDL).map_err(MigrationError::Ledger)?;

    let result = manager
        .query("SELECT filename, executed_at FROM migrations ORDER BY id", [])
        .map_err(MigrationError::Ledger)?;

    Ok(result
        .rows
        .iter()
        .filter_map(|row| {
            Some(MigrationRecord {
                filename: row.get_text("filename")?.to_string(),
                executed_at: row.get_text("executed_at")?.to_string(),
            })
        })
        .collect())
}

const RECORD_SQL: &str = "INSERT INTO migrations (filename) VALUES (?1)";

fn apply(manager: &ConnectionManager, filename: &str, sql: &str) -> Result<(), MigrationError> {
    let failed = |source: DbError| MigrationError::ExecutionFailed {
        filename: filename.to_string(),
        source,
    };

    if !manages_own_transaction(sql) {
        return manager
            .transaction(|tx| {
                tx.execute_batch(sql)?;
                tx.execute(RECORD_SQL, [filename])?;
                Ok(())
            })
            .map_err(failed);
    }

    tracing::debug!(migration = filename, "migration manages its own transaction");
    let conn = manager.connection().map_err(failed)?;

    if let Err(err) = conn.execute_batch(sql) {
        if !conn.is_autocommit() {
            if let Err(rollback) = conn.execute_batch("ROLLBACK;") {
                tracing::error!(
                    migration = filename,
                    error = %rollback,
                    "rollback after failed migration failed"
                );
            }
        }
        return Err(failed(err.into()));
    }

    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK;").map_err(|err| failed(err.into()))?;
        return Err(MigrationError::OpenTransaction {
            filename: filename.to_string(),
        });
    }

    conn.execute(RECORD_SQL, [filename]).map_err(|err| failed(err.into()))?;
    Ok(())
}

/// Whether `sql` contains its own top-level transaction control.
///
/// Splits on `;` outside quotes and comments and looks at the first keyword
/// of each statement. The `BEGIN`/`END` pair of a `CREATE TRIGGER` body is
/// not transaction control.
fn manages_own_transaction(sql: &str) -> bool {
    let mut in_trigger = false;
    for statement in split_statements(sql) {
        let mut words = statement
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .filter(|word| !word.is_empty())
            .map(str::to_ascii_uppercase);
        let Some(first) = words.next() else {
            continue;
        };

        if in_trigger {
            if first == "END" {
                in_trigger = false;
            }
            continue;
        }

        if matches!(first.as_str(), "BEGIN" | "COMMIT" | "END" | "ROLLBACK") {
            return true;
        }
        in_trigger = first == "CREATE" && words.take(4).any(|word| word == "TRIGGER");
    }
    false
}

/// Splits SQL text into statements, dropping comments.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                current.push(c);
                for q in chars.by_ref() {
                    current.push(q);
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                current.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                current.push(' ');
            }
            ';' => statements.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    statements.push(current);
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbRuntimeSettings;

    fn memory_manager() -> ConnectionManager {
        ConnectionManager::new(":memory:", DbRuntimeSettings::default())
            .expect("manager creation should succeed")
    }

    fn write(dir: &Path, name: &str, sql: &str) {
        fs::write(dir.join(name), sql).expect("should write migration file");
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        write(dir.path(), "010_later.sql", "");
        write(dir.path(), "002_second.sql", "");
        write(dir.path(), "001_first.sql", "");
        write(dir.path(), "README.md", "");
        write(dir.path(), "003_backup.sql.bak", "");
        fs::create_dir(dir.path().join("004_dir.sql")).expect("should create dir");

        let names: Vec<String> = discover_migrations(dir.path())
            .expect("discovery should succeed")
            .into_iter()
            .map(|file| file.filename)
            .collect();

        assert_eq!(names, ["001_first.sql", "002_second.sql", "010_later.sql"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let manager = memory_manager();

        let err = run_migrations(&manager, &dir.path().join("absent"))
            .expect_err("missing directory should fail");
        assert!(matches!(err, MigrationError::Discover { .. }));
        assert!(err.db_error().is_none());
    }

    #[test]
    fn empty_directory_creates_ledger_and_succeeds() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let manager = memory_manager();

        let report = run_migrations(&manager, dir.path()).expect("empty run should succeed");
        assert!(report.is_up_to_date());
        assert!(report.skipped.is_empty());

        let ledger = applied_migrations(&manager).expect("ledger should be readable");
        assert!(ledger.is_empty());
    }

    #[test]
    fn run_is_idempotent() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        write(
            dir.path(),
            "001_counter.sql",
            "CREATE TABLE counter (n INTEGER); INSERT INTO counter VALUES (1);",
        );
        let manager = memory_manager();

        let first = run_migrations(&manager, dir.path()).expect("first run should succeed");
        assert_eq!(first.applied, ["001_counter.sql"]);

        let second = run_migrations(&manager, dir.path()).expect("second run should succeed");
        assert_eq!(second.applied_count(), 0, "no new migrations to apply");
        assert_eq!(second.skipped, ["001_counter.sql"]);

        let count = manager
            .query("SELECT COUNT(*) AS n FROM counter", [])
            .expect("count should succeed");
        assert_eq!(count.rows[0].get_i64("n"), Some(1), "sql must not run twice");
    }

    #[test]
    fn side_effects_roll_back_when_ledger_insert_fails() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        write(
            dir.path(),
            "001_ledger_conflict.sql",
            "CREATE TABLE rolled_back (id INTEGER PRIMARY KEY);
             INSERT INTO migrations (filename) VALUES ('001_ledger_conflict.sql');",
        );
        let manager = memory_manager();

        let err = run_migrations(&manager, dir.path())
            .expect_err("ledger insert conflict should fail the migration");
        match err {
            MigrationError::ExecutionFailed { filename, .. } => {
                assert_eq!(filename, "001_ledger_conflict.sql")
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        let exists = manager
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'rolled_back') AS present",
                [],
            )
            .expect("should query sqlite_master");
        assert_eq!(
            exists.rows[0].get_i64("present"),
            Some(0),
            "schema side effects should be rolled back"
        );
        assert!(applied_migrations(&manager).unwrap().is_empty());
    }

    fn table_exists(manager: &ConnectionManager, table: &str) -> bool {
        let result = manager
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1) AS present",
                [table],
            )
            .expect("should query sqlite_master");
        result.rows[0].get_i64("present") == Some(1)
    }

    #[test]
    fn detects_transaction_control() {
        assert!(manages_own_transaction("BEGIN; CREATE TABLE t (id INTEGER); COMMIT;"));
        assert!(manages_own_transaction(
            "  begin transaction;\nCREATE TABLE t (id INTEGER);\nend;"
        ));
        assert!(manages_own_transaction("-- header\nBEGIN IMMEDIATE; SELECT 1; ROLLBACK"));

        assert!(!manages_own_transaction("CREATE TABLE t (id INTEGER);"));
        assert!(!manages_own_transaction(
            "-- BEGIN;\n/* COMMIT; */ CREATE TABLE t (id INTEGER);"
        ));
        assert!(!manages_own_transaction("INSERT INTO notes VALUES ('BEGIN; COMMIT;');"));
        assert!(!manages_own_transaction(
            "CREATE TABLE log (msg TEXT);
             CREATE TRIGGER IF NOT EXISTS log_insert AFTER INSERT ON log
             BEGIN
                 UPDATE log SET msg = upper(msg) WHERE rowid = new.rowid;
                 DELETE FROM log WHERE msg = '';
             END;
             CREATE INDEX log_msg ON log (msg);"
        ));
    }

    #[test]
    fn self_transacting_file_applies_and_is_recorded() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        write(
            dir.path(),
            "001_explicit_tx.sql",
            "BEGIN;
             CREATE TABLE garages (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO garages (name) VALUES ('north');
             COMMIT;",
        );
        write(dir.path(), "002_plain.sql", "CREATE TABLE bays (id INTEGER);");
        let manager = memory_manager();

        let report = run_migrations(&manager, dir.path()).expect("run should succeed");
        assert_eq!(report.applied, ["001_explicit_tx.sql", "002_plain.sql"]);
        assert!(table_exists(&manager, "garages"));

        let ledger = applied_migrations(&manager).expect("ledger should be readable");
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].filename, "001_explicit_tx.sql");

        let again = run_migrations(&manager, dir.path()).expect("second run should succeed");
        assert!(again.is_up_to_date());
    }

    #[test]
    fn failing_self_transacting_file_rolls_back() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        write(
            dir.path(),
            "001_explicit_tx.sql",
            "BEGIN;
             CREATE TABLE garages (id INTEGER PRIMARY KEY);
             INSERT INTO no_such_table VALUES (1);
             COMMIT;",
        );
        let manager = memory_manager();

        let err = run_migrations(&manager, dir.path()).expect_err("broken file should fail");
        assert!(matches!(err, MigrationError::ExecutionFailed { .. }));
        assert!(!table_exists(&manager, "garages"));
        assert!(applied_migrations(&manager).unwrap().is_empty());

        // The connection is usable again for the next run.
        manager
            .query("SELECT 1 AS one", [])
            .expect("connection should not be stuck in a transaction");
    }

    #[test]
    fn unterminated_transaction_is_rejected() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        write(
            dir.path(),
            "001_dangling.sql",
            "BEGIN; CREATE TABLE dangling (id INTEGER);",
        );
        let manager = memory_manager();

        let err = run_migrations(&manager, dir.path()).expect_err("open transaction should fail");
        assert!(matches!(
            err,
            MigrationError::OpenTransaction { ref filename } if filename == "001_dangling.sql"
        ));
        assert!(!table_exists(&manager, "dangling"));
        assert!(applied_migrations(&manager).unwrap().is_empty());
    }
}
