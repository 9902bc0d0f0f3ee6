//! Costlens API crate - axum HTTP server and route handlers.
//!
//! Exposes the SQL assistant over JSON: the chat endpoint, conversation
//! history lookup and a health check.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
