//! Database connection management.
//!
//! Wraps the single writer Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use costlens_core::error::CostlensError;

use crate::migrations;

/// Where the database lives. Read-only sessions open the same location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// Shared-cache in-memory database, addressed by URI.
    Memory(String),
}

/// Thread-safe SQLite database wrapper holding the writer connection.
pub struct Database {
    conn: Mutex<Connection>,
    location: DbLocation,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn open(path: &Path) -> Result<Self, CostlensError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| CostlensError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16384;",
        )
        .map_err(|e| CostlensError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        Self::finish(conn, DbLocation::File(path.to_path_buf()))
    }

    /// Open a fresh in-memory database.
    ///
    /// Uses a uniquely named shared-cache URI so a [`crate::ReadPool`] can
    /// attach to the same data. The database lives as long as this handle.
    pub fn in_memory() -> Result<Self, CostlensError> {
        let uri = format!(
            "file:costlens_mem_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| CostlensError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| CostlensError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Self::finish(conn, DbLocation::Memory(uri))
    }

    fn finish(conn: Connection, location: DbLocation) -> Result<Self, CostlensError> {
        let db = Self {
            conn: Mutex::new(conn),
            location,
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    /// Execute a closure with a reference to the writer connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CostlensError>
    where
        F: FnOnce(&Connection) -> Result<T, CostlensError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CostlensError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .finish()
    }
}
