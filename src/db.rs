//! Database connection and schema management.
//!
//! SQLite connectivity for the download ledger: connection pooling, WAL
//! mode for concurrent reads, and automatic migration execution. The
//! in-memory constructor gives tests the same schema without touching disk;
//! call sites receive a [`Database`] either way and cannot tell the
//! difference.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Pool size. Small on purpose: SQLite serializes writers anyway, and the
/// ledger additionally serializes its own calls.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before SQLITE_BUSY.
const SQLITE_BUSY_TIMEOUT_MS: u32 = 5000;

/// Directory under the home directory holding the ledger database.
const DATA_DIR_NAME: &str = ".humblebundle";

/// Ledger database filename.
const DATABASE_FILE_NAME: &str = "downloads.db";

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to create the data directory for a file-backed database.
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// SQLite connection wrapper with pooling and schema management.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if necessary) the ledger database at `db_path`.
    ///
    /// Enables WAL mode so stats reads never block completion writes, sets
    /// a busy timeout, and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::DataDir`] if the parent directory cannot be
    /// created, [`DbError::Connection`] if the connection fails, or
    /// [`DbError::Migration`] if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| DbError::DataDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        // rwc: create the file on first run.
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect(&db_url)
            .await?;

        // WAL lets stats reads proceed while a completion write is in flight.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={SQLITE_BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database with the full schema, for tests.
    ///
    /// Limited to one connection so every query sees the same in-memory
    /// store. WAL mode is pointless without a file and is not enabled.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the connection fails, or
    /// [`DbError::Migration`] if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// Call before process exit; the instance must not be used afterwards.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Returns the default on-disk location of the ledger database,
/// `~/.humblebundle/downloads.db`, falling back to the current directory
/// when no home directory is known.
#[must_use]
pub fn default_database_path() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(DATA_DIR_NAME).join(DATABASE_FILE_NAME),
        |home| PathBuf::from(home).join(DATA_DIR_NAME).join(DATABASE_FILE_NAME),
    )
}
