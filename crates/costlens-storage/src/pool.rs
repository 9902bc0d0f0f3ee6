//! Fixed-size pool of read-only SQLite sessions.
//!
//! Concurrency is bounded by a semaphore sized to the number of connections,
//! so a burst of assistant queries waits for a free session instead of
//! opening new ones. Every session runs with `PRAGMA query_only = ON`; file
//! databases are additionally opened with `SQLITE_OPEN_READ_ONLY`.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use costlens_core::error::CostlensError;

use crate::db::{Database, DbLocation};

pub use rusqlite::InterruptHandle;

/// Bounded set of read-only connections to one database.
pub struct ReadPool {
    idle: Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl ReadPool {
    /// Open `size` read-only sessions against the same database as `db`.
    ///
    /// For in-memory databases `db` must outlive the pool.
    pub fn for_database(db: &Database, size: usize) -> Result<Arc<Self>, CostlensError> {
        if size == 0 {
            return Err(CostlensError::Config(
                "read pool size must be at least 1".to_string(),
            ));
        }
        let connections = (0..size)
            .map(|_| open_read_only(db.location()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(size, "Read pool opened");
        Ok(Arc::new(Self {
            idle: Mutex::new(connections),
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }))
    }

    /// Wait for a free session.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, CostlensError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| CostlensError::Storage(format!("Read pool closed: {}", e)))?;
        let conn = self
            .idle
            .lock()
            .map_err(|e| CostlensError::Storage(format!("Read pool lock poisoned: {}", e)))?
            .pop()
            .ok_or_else(|| CostlensError::Storage("Read pool exhausted".to_string()))?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sessions not currently checked out.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn give_back(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }
}

impl std::fmt::Debug for ReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// A checked-out session. Returns to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ReadPool>,
    // Released after `drop` has returned the connection.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Handle that aborts whatever statement this session is running.
    pub fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.conn.as_ref().map(Connection::get_interrupt_handle)
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> Result<&Connection, CostlensError> {
        self.conn
            .as_ref()
            .ok_or_else(|| CostlensError::Storage("Pooled connection already released".to_string()))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}

fn open_read_only(location: &DbLocation) -> Result<Connection, CostlensError> {
    let conn = match location {
        DbLocation::File(path) => Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ),
        // Shared-cache memory databases cannot be attached read-only; query_only guards them.
        DbLocation::Memory(uri) => Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ),
    }
    .map_err(|e| CostlensError::Storage(format!("Failed to open read session: {}", e)))?;

    conn.execute_batch(
        "PRAGMA query_only = ON;
         PRAGMA busy_timeout = 1000;",
    )
    .map_err(|e| CostlensError::Storage(format!("Failed to set read session pragmas: {}", e)))?;

    Ok(conn)
}
