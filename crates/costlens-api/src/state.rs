//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use costlens_agent::SqlAgent;
use costlens_core::config::ServerConfig;
use costlens_storage::Database;

/// Shared application state.
///
/// All fields use `Arc` or are cheap to clone across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// The chat pipeline.
    pub agent: Arc<SqlAgent>,
    /// Writer handle, used by the health check.
    pub database: Arc<Database>,
    /// Bind, CORS and rate limit settings.
    pub server: ServerConfig,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(agent: Arc<SqlAgent>, database: Arc<Database>, server: ServerConfig) -> Self {
        Self {
            agent,
            database,
            server,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}
