//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use costlens_core::error::CostlensError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Request bodies above this size fail JSON extraction, which `chat`
/// answers with a 400 `bad_request`.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let limiter = RateLimiter::new(state.server.rate_limit_per_minute);

    let api_routes = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route(
            "/api/chat/{conversation_id}/history",
            get(handlers::chat_history),
        )
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(limiter));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `host:port` from the server config and serve until the process exits.
pub async fn start_server(state: AppState) -> Result<(), CostlensError> {
    let addr = format!("{}:{}", state.server.host, state.server.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CostlensError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    info!("Starting API server on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| CostlensError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
