//! Database layer for the tasklist application.
//!
//! Provides a pooled SQLite connection manager (via `r2d2`), a forward-only
//! SQL migration runner backed by a ledger table, and a health reporter used
//! by the operational scripts.
//!
//! # Design decisions
//!
//! - **Explicit connection manager**: the pool lives inside a
//!   [`ConnectionManager`] that callers construct and pass around. Shutdown
//!   is [`ConnectionManager::close`], which consumes the manager.
//! - **Lazy connections**: no physical connection is opened until the first
//!   query, so building a manager never blocks on an unreachable database.
//! - **Migrations from disk**: migration files are read from a directory at
//!   run time and applied in filename order, each inside its own
//!   transaction together with its ledger record.

mod error;
pub mod health;
pub mod migrations;
mod pool;

pub use error::DbError;
pub use health::{connection_hint, run_health_check, HealthError, HealthReport, HealthWarning};
pub use migrations::{
    applied_migrations, discover_migrations, run_migrations, MigrationError, MigrationFile,
    MigrationRecord, MigrationReport,
};
pub use pool::{ConnectionManager, DbPool, DbRuntimeSettings, QueryResult, Row};

/// Environment variable holding the database connection string.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
