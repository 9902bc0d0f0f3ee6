//! The chat pipeline.
//!
//! `SqlAgent::handle` runs one request end to end:
//! validate -> load history -> prompt -> LLM -> extract -> validate SQL ->
//! execute -> compose -> record. Only request-shape problems surface as
//! errors; every later failure becomes a normal answer.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use costlens_core::AppSchema;

use crate::composer::{Draft, ResponseComposer};
use crate::error::ChatError;
use crate::executor::QueryExecutor;
use crate::extractor::extract;
use crate::llm::{LlmClient, LlmError};
use crate::prompt::{Prompt, PromptBuilder};
use crate::store::ConversationStore;
use crate::types::{new_conversation_id, AgentSettings, ChatRequest, ChatResponse, ValidationOutcome};
use crate::validator::QueryValidator;

/// Natural-language question answering over the cost dashboard schema.
pub struct SqlAgent {
    settings: AgentSettings,
    prompts: PromptBuilder,
    validator: QueryValidator,
    composer: ResponseComposer,
    store: Arc<dyn ConversationStore>,
    llm: Arc<dyn LlmClient>,
    executor: QueryExecutor,
}

impl SqlAgent {
    pub fn new(
        settings: AgentSettings,
        schema: AppSchema,
        store: Arc<dyn ConversationStore>,
        llm: Arc<dyn LlmClient>,
        executor: QueryExecutor,
    ) -> Self {
        let prompts = PromptBuilder::new(&schema);
        let validator = QueryValidator::new(schema, settings.max_query_chars);
        let composer = ResponseComposer::new(settings.display_rows, settings.display_cell_chars);
        Self {
            settings,
            prompts,
            validator,
            composer,
            store,
            llm,
            executor,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn llm_configured(&self) -> bool {
        self.llm.is_configured()
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Answer one chat message.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        request.validate(self.settings.max_message_chars)?;
        let started = Instant::now();

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(new_conversation_id);

        let mut conversation = match self.store.get(&conversation_id) {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!(conversation_id = %conversation_id, "Failed to load conversation: {}", e);
                return Ok(self.composer.unavailable(&conversation_id));
            }
        };
        let keep = self.settings.history_turns;
        if conversation.turns.len() > keep {
            conversation.turns.drain(..conversation.turns.len() - keep);
        }

        let prompt = self.prompts.build(&conversation, &request.message);

        let llm_text = match self.generate(&prompt, &conversation_id).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    message_chars = request.message.chars().count(),
                    "LLM call failed: {}",
                    e
                );
                return Ok(self.composer.unavailable(&conversation_id));
            }
        };

        let candidate = extract(&llm_text);
        let outcome = candidate
            .extracted
            .then(|| self.validator.validate(&candidate));

        let execution = match &outcome {
            Some(ValidationOutcome::Accepted(query)) => Some(self.executor.execute(query).await),
            Some(ValidationOutcome::Rejected { reason, detail }) => {
                warn!(
                    conversation_id = %conversation_id,
                    reason = %reason.code(),
                    "Rejected generated SQL: {}",
                    detail
                );
                None
            }
            None => None,
        };

        let draft = Draft {
            llm_text: &llm_text,
            candidate: &candidate,
            outcome: outcome.as_ref(),
            execution: execution.as_ref(),
        };

        let response = match self.composer.compose_and_record(
            self.store.as_ref(),
            &conversation_id,
            &request.message,
            &draft,
        ) {
            Ok(response) => response,
            Err(e) => {
                warn!(conversation_id = %conversation_id, "Failed to record exchange: {}", e);
                return Ok(self.composer.unavailable(&conversation_id));
            }
        };

        info!(
            conversation_id = %conversation_id,
            message_chars = request.message.chars().count(),
            sql = response.sql_query.is_some(),
            rows = execution
                .as_ref()
                .and_then(|r| r.as_ref().ok())
                .map(|r| r.row_count)
                .unwrap_or(0),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat request handled"
        );
        Ok(response)
    }

    /// Call the model, retrying once after a short backoff.
    async fn generate(&self, prompt: &Prompt, conversation_id: &str) -> Result<String, LlmError> {
        let timeout = self.settings.llm_timeout;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, self.llm.generate(prompt, timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout),
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) if attempt < 2 && self.llm.is_configured() => {
                    debug!(conversation_id, attempt, "LLM call failed, retrying: {}", e);
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use costlens_storage::{seed_sample_data, Database, ReadPool};

    use crate::composer::UNAVAILABLE_MESSAGE;
    use crate::store::InMemoryConversationStore;
    use crate::types::Role;

    /// Replays queued replies and records every prompt it sees.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<Prompt>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn replying(texts: &[&str]) -> Arc<Self> {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_prompt(&self) -> Prompt {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, prompt: &Prompt, _timeout: Duration) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
        }
    }

    struct Harness {
        _db: Database,
        pool: Arc<ReadPool>,
        store: Arc<InMemoryConversationStore>,
        agent: SqlAgent,
    }

    fn make_agent(llm: Arc<ScriptedLlm>) -> Harness {
        let db = Database::in_memory().unwrap();
        seed_sample_data(&db).unwrap();
        let pool = ReadPool::for_database(&db, 2).unwrap();
        let settings = AgentSettings {
            retry_backoff: Duration::from_millis(10),
            llm_timeout: Duration::from_secs(2),
            ..AgentSettings::default()
        };
        let store = Arc::new(InMemoryConversationStore::new(settings.history_turns));
        let executor = QueryExecutor::new(
            Arc::clone(&pool),
            settings.statement_timeout,
            settings.max_rows,
        );
        let agent = SqlAgent::new(
            settings,
            AppSchema::cost_dashboard(),
            store.clone(),
            llm,
            executor,
        );
        Harness {
            _db: db,
            pool,
            store,
            agent,
        }
    }

    const ACTIVE_PROJECTS: &str = "Here are the active projects:\n\n```sql\nSELECT project_name, deployed_region FROM project WHERE is_active = 1 ORDER BY id;\n```";

    #[tokio::test]
    async fn test_active_projects_question() {
        let llm = ScriptedLlm::replying(&[ACTIVE_PROJECTS]);
        let h = make_agent(llm.clone());

        let resp = h
            .agent
            .handle(ChatRequest::new("Show me all active projects", None))
            .await
            .unwrap();

        assert!(resp.conversation_id.starts_with("conv-"));
        assert_eq!(
            resp.sql_query.as_deref(),
            Some("SELECT project_name, deployed_region FROM project WHERE is_active = 1 ORDER BY id")
        );
        assert!(resp.response.contains("Query Results:"));
        assert!(resp.response.contains("Cloud Migration Initiative"));
        assert!(!resp.response.contains("```"));

        let conv = h.store.history(&resp.conversation_id).unwrap().unwrap();
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(conv.turns[0].content, "Show me all active projects");
        assert_eq!(conv.turns[1].content, resp.response);
    }

    #[tokio::test]
    async fn test_forbidden_sql_refused_and_not_run() {
        let llm = ScriptedLlm::replying(&["Sure.\n```sql\nDELETE FROM project\n```"]);
        let h = make_agent(llm);

        let resp = h
            .agent
            .handle(ChatRequest::new("Delete all projects", None))
            .await
            .unwrap();

        assert_eq!(resp.sql_query, None);
        assert!(resp.response.contains("ForbiddenKeyword:DELETE"));
        assert!(!resp.response.contains("DELETE FROM"));

        let session = h.pool.acquire().await.unwrap();
        let count: i64 = session
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM project", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_overlong_message_never_reaches_llm() {
        let llm = ScriptedLlm::replying(&["unused"]);
        let h = make_agent(llm.clone());

        let err = h
            .agent
            .handle(ChatRequest::new("a".repeat(1500), Some("c1".to_string())))
            .await
            .unwrap_err();

        assert_eq!(err, ChatError::MessageTooLong(1000));
        assert_eq!(llm.calls(), 0);
        assert!(h.store.history("c1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_carried_into_next_prompt() {
        let llm = ScriptedLlm::replying(&[ACTIVE_PROJECTS, "All three are in different regions."]);
        let h = make_agent(llm.clone());

        let first = h
            .agent
            .handle(ChatRequest::new("Show me all active projects", Some("c1".to_string())))
            .await
            .unwrap();
        let second = h
            .agent
            .handle(ChatRequest::new("Which regions are they in?", Some("c1".to_string())))
            .await
            .unwrap();

        assert_eq!(second.conversation_id, "c1");
        assert_eq!(second.sql_query, None);

        let prompt = llm.last_prompt();
        assert_eq!(prompt.history.len(), 2);
        assert_eq!(prompt.history[0].content, "Show me all active projects");
        assert_eq!(prompt.history[1].content, first.response);
        assert_eq!(prompt.user, "Which regions are they in?");
        assert_eq!(h.store.history("c1").unwrap().unwrap().turns.len(), 4);
    }

    #[tokio::test]
    async fn test_unseen_conversation_id_starts_empty() {
        let llm = ScriptedLlm::replying(&["Hello! Ask me about your cloud costs."]);
        let h = make_agent(llm.clone());

        let resp = h
            .agent
            .handle(ChatRequest::new("hi", Some("brand-new".to_string())))
            .await
            .unwrap();

        assert_eq!(resp.conversation_id, "brand-new");
        assert!(llm.last_prompt().history.is_empty());
        let conv = h.store.history("brand-new").unwrap().unwrap();
        assert_eq!(conv.turns[0].role, Role::User);
        assert_eq!(conv.turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_reply_without_sql_block_passes_through() {
        let text = "I can only help with questions about project costs and resources.";
        let llm = ScriptedLlm::replying(&[text]);
        let h = make_agent(llm);

        let resp = h
            .agent
            .handle(ChatRequest::new("What's the weather?", None))
            .await
            .unwrap();

        assert_eq!(resp.response, text);
        assert_eq!(resp.sql_query, None);
        assert_eq!(h.pool.available(), h.pool.size());
    }

    #[tokio::test]
    async fn test_llm_retried_once_then_succeeds() {
        let llm = ScriptedLlm::new(vec![
            Err(LlmError::Timeout),
            Ok("There are three projects.".to_string()),
        ]);
        let h = make_agent(llm.clone());

        let resp = h
            .agent
            .handle(ChatRequest::new("How many projects?", None))
            .await
            .unwrap();

        assert_eq!(llm.calls(), 2);
        assert_eq!(resp.response, "There are three projects.");
    }

    #[tokio::test]
    async fn test_llm_failure_is_generic_and_unrecorded() {
        let llm = ScriptedLlm::new(vec![
            Err(LlmError::Unavailable("boom: secret detail".to_string())),
            Err(LlmError::Unavailable("boom again".to_string())),
        ]);
        let h = make_agent(llm.clone());

        let resp = h
            .agent
            .handle(ChatRequest::new("How many projects?", Some("c1".to_string())))
            .await
            .unwrap();

        assert_eq!(llm.calls(), 2);
        assert_eq!(resp.response, UNAVAILABLE_MESSAGE);
        assert_eq!(resp.sql_query, None);
        assert!(!resp.response.contains("secret"));
        let turns = h.store.history("c1").unwrap().map(|c| c.turns.len()).unwrap_or(0);
        assert_eq!(turns, 0);
    }

    #[tokio::test]
    async fn test_execution_failure_reports_kind() {
        let llm = ScriptedLlm::replying(&["```sql\nSELECT no_such_column FROM project\n```"]);
        let h = make_agent(llm);

        let resp = h
            .agent
            .handle(ChatRequest::new("Show the thing", None))
            .await
            .unwrap();

        assert!(resp.response.contains("SyntaxError"));
        assert!(!resp.response.contains("no such column"));
        assert_eq!(resp.sql_query.as_deref(), Some("SELECT no_such_column FROM project"));
    }

    #[tokio::test]
    async fn test_out_of_scope_table_refused() {
        let llm = ScriptedLlm::replying(&["```sql\nSELECT * FROM sqlite_master\n```"]);
        let h = make_agent(llm);

        let resp = h
            .agent
            .handle(ChatRequest::new("List every table", None))
            .await
            .unwrap();

        assert_eq!(resp.sql_query, None);
        assert!(resp.response.contains("OutOfScope"));
    }

    #[test]
    fn test_llm_configured_flag() {
        let h = make_agent(ScriptedLlm::replying(&[]));
        assert!(h.agent.llm_configured());
    }
}
