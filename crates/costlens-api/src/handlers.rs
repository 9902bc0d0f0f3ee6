//! Route handler functions for all API endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use costlens_agent::types::is_valid_conversation_id;
use costlens_agent::{ChatRequest, ChatResponse, ConversationStore, Turn};
use costlens_core::error::CostlensError;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub database: String,
    pub llm_configured: bool,
}

// =============================================================================
// Chat
// =============================================================================

/// POST /api/chat - answer one message.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        debug!("Rejected chat body: {}", e.body_text());
        ApiError::BadRequest("request body must be JSON with a \"message\" field".to_string())
    })?;

    let response = state.agent.handle(request).await.map_err(|e| {
        debug!("Rejected chat request: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(response))
}

/// GET /api/chat/{conversation_id}/history - retained turns, oldest first.
pub async fn chat_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if !is_valid_conversation_id(&conversation_id) {
        return Err(ApiError::BadRequest(
            "conversation id must be 1-128 characters of letters, digits, '-' or '_'".to_string(),
        ));
    }

    let conversation = state
        .agent
        .store()
        .history(&conversation_id)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("conversation {} not found", conversation_id))
        })?;

    Ok(Json(HistoryResponse {
        conversation_id: conversation.id,
        turns: conversation.turns,
    }))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness plus a database ping.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.database.with_conn(|conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| CostlensError::Storage(e.to_string()))
    }) {
        Ok(_) => "ok",
        Err(e) => {
            warn!("Health check database ping failed: {}", e);
            "unavailable"
        }
    };

    Json(HealthResponse {
        status: if database == "ok" { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        started_at: state.started_at,
        database: database.to_string(),
        llm_configured: state.agent.llm_configured(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use costlens_agent::{
        AgentSettings, InMemoryConversationStore, LlmClient, LlmError, Prompt, QueryExecutor,
        SqlAgent,
    };
    use costlens_core::config::ServerConfig;
    use costlens_core::AppSchema;
    use costlens_storage::{seed_sample_data, Database, ReadPool};

    struct CannedLlm {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, _prompt: &Prompt, _timeout: Duration) -> Result<String, LlmError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(LlmError::Unavailable("no reply queued".to_string()))
            } else {
                Ok(replies.remove(0))
            }
        }
    }

    fn make_state(replies: &[&str]) -> AppState {
        let db = Database::in_memory().unwrap();
        seed_sample_data(&db).unwrap();
        let pool = ReadPool::for_database(&db, 2).unwrap();
        let settings = AgentSettings {
            retry_backoff: Duration::from_millis(5),
            ..AgentSettings::default()
        };
        let executor = QueryExecutor::new(pool, settings.statement_timeout, settings.max_rows);
        let llm = Arc::new(CannedLlm {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        });
        let store = Arc::new(InMemoryConversationStore::new(settings.history_turns));
        let agent = SqlAgent::new(settings, AppSchema::cost_dashboard(), store, llm, executor);
        AppState::new(Arc::new(agent), Arc::new(db), ServerConfig::default())
    }

    fn make_app(replies: &[&str]) -> axum::Router {
        crate::create_router(make_state(replies))
    }

    fn post_chat(json: &str) -> Request<Body> {
        Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ---- health ----

    #[tokio::test]
    async fn test_health_endpoint() {
        let resp = make_app(&[])
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.database, "ok");
        assert!(health.llm_configured);
    }

    // ---- chat ----

    #[tokio::test]
    async fn test_chat_runs_query() {
        let app = make_app(&["```sql\nSELECT project_name FROM project ORDER BY id;\n```"]);
        let resp = app
            .oneshot(post_chat(r#"{"message": "List projects"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["sql_query"], "SELECT project_name FROM project ORDER BY id");
        assert!(json["response"].as_str().unwrap().contains("Client Analytics Platform"));
        assert!(json["conversation_id"].as_str().unwrap().starts_with("conv-"));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let resp = make_app(&[])
            .oneshot(post_chat(r#"{"message": "   "}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_chat_rejects_malformed_json() {
        let resp = make_app(&[])
            .oneshot(post_chat("{not json"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_chat_body_over_limit_is_bad_request() {
        let body = serde_json::json!({ "message": "y".repeat(crate::routes::MAX_BODY_BYTES + 1) })
            .to_string();
        let resp = make_app(&["unused"]).oneshot(post_chat(&body)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_chat_llm_down_still_ok() {
        let resp = make_app(&[])
            .oneshot(post_chat(r#"{"message": "How many projects?"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["response"].as_str().unwrap().contains("temporarily unavailable"));
        assert!(json["sql_query"].is_null());
    }

    // ---- history ----

    #[tokio::test]
    async fn test_history_roundtrip() {
        let app = make_app(&["Hello there."]);
        let resp = app
            .clone()
            .oneshot(post_chat(r#"{"message": "hi", "conversation_id": "abc-1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                Request::get("/api/chat/abc-1/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["conversation_id"], "abc-1");
        assert_eq!(json["turns"][0]["role"], "user");
        assert_eq!(json["turns"][0]["content"], "hi");
        assert_eq!(json["turns"][1]["content"], "Hello there.");
    }

    #[tokio::test]
    async fn test_history_unknown_is_404() {
        let resp = make_app(&[])
            .oneshot(
                Request::get("/api/chat/never-seen/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_bad_id_is_400() {
        let resp = make_app(&[])
            .oneshot(
                Request::get("/api/chat/bad%20id/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
