//! Bounded, read-only query execution.
//!
//! Each query runs on a pooled read-only session inside a deferred
//! transaction that is always rolled back. The wall-clock limit covers both
//! the wait for a session and the query itself; when it expires the running
//! statement is interrupted. Driver messages are logged and reduced to an
//! [`ExecutionErrorKind`] before anything leaves this module.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use tracing::{debug, warn};

use costlens_storage::ReadPool;

use crate::types::ExecutionResult;

/// What went wrong running an accepted query, stripped of driver detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionErrorKind {
    #[error("SyntaxError")]
    SyntaxError,
    #[error("Timeout")]
    Timeout,
    #[error("PermissionDenied")]
    PermissionDenied,
    #[error("Unknown")]
    Unknown,
}

type Failure = (ExecutionErrorKind, String);

/// Runs validated statements against the read pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<ReadPool>,
    timeout: Duration,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(pool: Arc<ReadPool>, timeout: Duration, max_rows: usize) -> Self {
        Self {
            pool,
            timeout,
            max_rows,
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Execute `query`, returning at most `max_rows` rows.
    pub async fn execute(&self, query: &str) -> Result<ExecutionResult, ExecutionErrorKind> {
        let started = Instant::now();

        let session = match tokio::time::timeout(self.timeout, self.pool.acquire()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to acquire read session");
                return Err(ExecutionErrorKind::Unknown);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out waiting for a read session"
                );
                return Err(ExecutionErrorKind::Timeout);
            }
        };

        let interrupt = session.interrupt_handle();
        // Set once the query is finished, before the session goes back to the pool.
        let finished = Arc::new(Mutex::new(false));
        let finished_in_task = Arc::clone(&finished);
        let sql = query.to_string();
        let max_rows = self.max_rows;

        let task = tokio::task::spawn_blocking(move || {
            let outcome = match session.connection() {
                Ok(conn) => run_query(conn, &sql, max_rows),
                Err(e) => Err((ExecutionErrorKind::Unknown, e.to_string())),
            };
            if let Ok(mut done) = finished_in_task.lock() {
                *done = true;
            }
            drop(session);
            outcome
        });

        let remaining = self.timeout.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(remaining, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err((ExecutionErrorKind::Unknown, join_err.to_string())),
            Err(_) => {
                // Holding the lock keeps the session from being handed to another query.
                if let Ok(done) = finished.lock() {
                    if !*done {
                        if let Some(handle) = &interrupt {
                            handle.interrupt();
                        }
                    }
                }
                Err((
                    ExecutionErrorKind::Timeout,
                    format!("exceeded {} ms", self.timeout.as_millis()),
                ))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                debug!(
                    row_count = result.row_count,
                    truncated = result.truncated,
                    elapsed_ms,
                    "Query executed"
                );
                Ok(result)
            }
            Err((kind, message)) => {
                warn!(kind = %kind, error = %message, elapsed_ms, "Query failed");
                Err(kind)
            }
        }
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<ExecutionResult, Failure> {
    let tx = conn.unchecked_transaction().map_err(classify)?;
    let fetched = fetch(&tx, sql, max_rows);
    if let Err(e) = tx.rollback() {
        debug!(error = %e, "Rollback of read transaction failed");
    }
    fetched
}

fn fetch(conn: &Connection, sql: &str, max_rows: usize) -> Result<ExecutionResult, Failure> {
    let mut stmt = conn.prepare(sql).map_err(classify)?;
    if !stmt.readonly() {
        return Err((
            ExecutionErrorKind::PermissionDenied,
            "statement would modify the database".to_string(),
        ));
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([]).map_err(classify)?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(classify)? {
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(value_to_json))
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;
        out.push(values);
    }

    Ok(ExecutionResult {
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
    })
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn classify(err: rusqlite::Error) -> Failure {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::OperationInterrupted => ExecutionErrorKind::Timeout,
            ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied => ExecutionErrorKind::PermissionDenied,
            // Plain SQLITE_ERROR: parse failures, unknown tables and columns.
            ErrorCode::Unknown => ExecutionErrorKind::SyntaxError,
            _ => ExecutionErrorKind::Unknown,
        },
        _ => ExecutionErrorKind::Unknown,
    };
    (kind, err.to_string())
}
