//! Connection pool ownership and the query/exec primitives built on it.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use r2d2::{CustomizeConnection, HandleError, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags, Params, Transaction};

use crate::error::DbError;

/// Runtime tunables for pooled SQLite connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long a caller waits for a connection before giving up, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Whether opening a connection may create a missing database file.
    pub create_if_missing: bool,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connect_timeout_ms: 5_000,
            create_if_missing: true,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A single result row, addressable by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in select order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|idx| &self.values[idx])
    }

    /// Returns the named column if it holds an integer.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            Some(Value::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the named column if it holds text.
    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            Some(Value::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Outcome of [`ConnectionManager::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Rows produced by the statement (empty for plain DML).
    pub rows: Vec<Row>,
    /// Returned rows for row-producing statements, changed rows otherwise.
    pub row_count: usize,
    /// The integer `id` column of the first returned row, if there is one.
    pub last_id: Option<i64>,
}

impl QueryResult {
    fn from_rows(rows: Vec<Row>) -> Self {
        let last_id = rows.first().and_then(|row| row.get_i64("id"));
        Self {
            row_count: rows.len(),
            rows,
            last_id,
        }
    }

    fn affected(changed: usize) -> Self {
        Self {
            rows: Vec::new(),
            row_count: changed,
            last_id: None,
        }
    }
}

/// Code of the most recent failed connection attempt, cleared on success.
type LastConnectError = Arc<Mutex<Option<ErrorCode>>>;

/// Logs connection lifecycle events raised by the pool.
#[derive(Debug, Clone)]
struct ConnectionEvents {
    location: String,
    last_error: LastConnectError,
}

impl ConnectionEvents {
    fn record(&self, code: Option<ErrorCode>) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = code;
        }
    }
}

impl CustomizeConnection<Connection, rusqlite::Error> for ConnectionEvents {
    fn on_acquire(&self, _conn: &mut Connection) -> Result<(), rusqlite::Error> {
        self.record(None);
        tracing::info!(database = %self.location, "connected to database");
        Ok(())
    }

    fn on_release(&self, _conn: Connection) {
        tracing::debug!(database = %self.location, "database connection closed");
    }
}

impl HandleError<rusqlite::Error> for ConnectionEvents {
    fn handle_error(&self, error: rusqlite::Error) {
        self.record(error.sqlite_error_code());
        tracing::error!(database = %self.location, %error, "database connection error");
    }
}

/// Owns the connection pool for one process.
///
/// Every operation checks a connection out, uses it, and hands it back when
/// the pooled handle is dropped, whether or not the statement succeeded.
pub struct ConnectionManager {
    pool: DbPool,
    location: String,
    last_error: LastConnectError,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("ConnectionManager")
            .field("location", &self.location)
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish()
    }
}

impl ConnectionManager {
    /// Builds a manager for the given connection string.
    ///
    /// Accepted forms are a plain path, `sqlite://<path>`, `sqlite:<path>`,
    /// a `file:` URI, or `:memory:`. No connection is opened here; the first
    /// query does that.
    ///
    /// # Errors
    ///
    /// Returns `DbError::EmptyUrl` or `DbError::UnsupportedScheme` if the
    /// connection string does not name a SQLite database.
    pub fn new(url: &str, settings: DbRuntimeSettings) -> Result<Self, DbError> {
        let location = parse_location(url)?;
        let in_memory = location == ":memory:";

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        if settings.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let manager = SqliteConnectionManager::file(&location)
            .with_flags(flags)
            .with_init(move |conn| {
                // In-memory databases report "memory" which is expected and acceptable.
                let journal_mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
                if journal_mode != "wal" && journal_mode != "memory" {
                    tracing::warn!(journal_mode = %journal_mode, "database did not switch to WAL journal mode");
                }
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = {};",
                    settings.busy_timeout_ms
                ))
            });

        let last_error = LastConnectError::default();
        let events = ConnectionEvents {
            location: location.clone(),
            last_error: Arc::clone(&last_error),
        };

        // Each in-memory connection is its own database, so keep exactly one alive.
        let (max_size, idle_timeout, max_lifetime) = if in_memory {
            (1, None, None)
        } else {
            (
                settings.pool_max_size.max(1),
                Some(Duration::from_secs(600)),
                Some(Duration::from_secs(1_800)),
            )
        };

        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(0))
            .idle_timeout(idle_timeout)
            .max_lifetime(max_lifetime)
            .connection_timeout(Duration::from_millis(settings.connect_timeout_ms.max(1)))
            .connection_customizer(Box::new(events.clone()))
            .error_handler(Box::new(events))
            .build_unchecked(manager);

        tracing::debug!(database = %location, max_size, "database pool configured");

        Ok(Self {
            pool,
            location,
            last_error,
        })
    }

    /// The database location this manager connects to.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Current pool occupancy.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Checks a connection out of the pool.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connect` if no connection becomes available within
    /// the configured connect timeout.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, DbError> {
        self.pool.get().map_err(|source| DbError::Connect {
            source,
            last_code: self.last_error.lock().ok().and_then(|slot| *slot),
        })
    }

    /// Executes a single parameterized statement and collects its rows.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connect` if no connection is available, or
    /// `DbError::Sqlite` if the statement fails to prepare or run.
    pub fn query<P: Params>(&self, sql: &str, params: P) -> Result<QueryResult, DbError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            let changed = stmt.execute(params)?;
            return Ok(QueryResult::affected(changed));
        }

        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = stmt.query(params)?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|idx| row.get::<_, Value>(idx))
                .collect::<Result<Vec<_>, _>>()?;
            collected.push(Row {
                columns: Arc::clone(&columns),
                values,
            });
        }

        Ok(QueryResult::from_rows(collected))
    }

    /// Executes a raw, possibly multi-statement SQL batch.
    ///
    /// Only for trusted, pre-authored SQL such as migration files. Nothing
    /// is parameterized.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if no connection is available or any statement fails.
    pub fn exec(&self, sql: &str) -> Result<(), DbError> {
        let conn = self.connection()?;
        conn.execute_batch(sql)?;
        tracing::debug!(database = %self.location, "sql batch executed");
        Ok(())
    }

    /// Runs `f` inside a transaction on a single pooled connection.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`, or `DbError` if the connection,
    /// `BEGIN`, or `COMMIT` fails.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DbError>,
    {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Applies the initial schema file if it exists.
    ///
    /// Failures are logged and never returned, so a misconfigured bootstrap
    /// cannot stop the hosting process from starting. Returns whether the
    /// schema was applied.
    pub fn initialize_database(&self, init_file: &Path) -> bool {
        if !init_file.is_file() {
            tracing::debug!(path = %init_file.display(), "no initial schema file, skipping bootstrap");
            return false;
        }

        let sql = match std::fs::read_to_string(init_file) {
            Ok(sql) => sql,
            Err(error) => {
                tracing::error!(path = %init_file.display(), %error, "failed to read initial schema");
                return false;
            }
        };

        match self.exec(&sql) {
            Ok(()) => {
                tracing::info!(path = %init_file.display(), "database initialized with schema");
                true
            }
            Err(error) => {
                tracing::error!(path = %init_file.display(), %error, "error initializing database");
                false
            }
        }
    }

    /// Closes every pooled connection.
    ///
    /// Consumes the manager; connections still checked out elsewhere close
    /// when their handles drop.
    pub fn close(self) {
        let state = self.pool.state();
        tracing::debug!(
            database = %self.location,
            connections = state.connections,
            idle = state.idle_connections,
            "closing database pool"
        );
        drop(self.pool);
    }
}

/// Turns a connection string into the location handed to SQLite.
fn parse_location(url: &str) -> Result<String, DbError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(DbError::EmptyUrl);
    }
    if url == ":memory:" || url.starts_with("file:") {
        return Ok(url.to_string());
    }

    let rest = match url.split_once("://") {
        Some((scheme, rest)) if is_sqlite_scheme(scheme) => rest,
        Some((scheme, _)) => return Err(DbError::UnsupportedScheme(scheme.to_string())),
        None => url.strip_prefix("sqlite:").unwrap_or(url),
    };

    if rest.is_empty() {
        return Err(DbError::EmptyUrl);
    }
    Ok(rest.to_string())
}

fn is_sqlite_scheme(scheme: &str) -> bool {
    scheme.eq_ignore_ascii_case("sqlite") || scheme.eq_ignore_ascii_case("sqlite3")
}
