//! Shared types for the SQL assistant pipeline.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use costlens_core::CostlensConfig;

use crate::error::ChatError;
use crate::validator::RejectReason;

// =============================================================================
// Requests and responses
// =============================================================================

static CONVERSATION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid regex"));

/// `<` opening a tag, closing tag, comment or processing instruction.
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z/!?]").expect("valid regex"));

/// An incoming chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id,
        }
    }

    /// Check the request shape. Runs before anything touches the LLM.
    pub fn validate(&self, max_message_chars: usize) -> Result<(), ChatError> {
        if self.message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.message.chars().count() > max_message_chars {
            return Err(ChatError::MessageTooLong(max_message_chars));
        }
        if self
            .message
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(ChatError::InvalidCharacters);
        }
        if MARKUP.is_match(&self.message) {
            return Err(ChatError::MarkupNotAllowed);
        }
        if let Some(id) = &self.conversation_id {
            if !is_valid_conversation_id(id) {
                return Err(ChatError::InvalidConversationId);
            }
        }
        Ok(())
    }
}

/// Whether `id` is 1-128 characters of `[A-Za-z0-9_-]`.
pub fn is_valid_conversation_id(id: &str) -> bool {
    CONVERSATION_ID.is_match(id)
}

/// Generate a fresh conversation identifier.
pub fn new_conversation_id() -> String {
    format!("conv-{}", uuid::Uuid::new_v4())
}

/// The answer returned to the caller.
///
/// `sql_query` is only set when a statement passed validation and was run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sql_query: Option<String>,
    pub conversation_id: String,
}

// =============================================================================
// Conversation history
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation. Never modified after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of a conversation's retained turns, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
        }
    }
}

// =============================================================================
// Pipeline values
// =============================================================================

/// SQL pulled out of an LLM reply, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub raw: String,
    pub extracted: bool,
}

impl CandidateQuery {
    pub fn none() -> Self {
        Self {
            raw: String::new(),
            extracted: false,
        }
    }

    pub fn found(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            extracted: true,
        }
    }
}

/// Verdict of the query validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Holds the normalized statement that will be executed.
    Accepted(String),
    Rejected { reason: RejectReason, detail: String },
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }
}

/// Rows returned by an executed query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// More rows existed than the row cap allowed.
    pub truncated: bool,
}

impl ExecutionResult {
    /// Rows keyed by column name.
    pub fn rows_as_maps(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Pipeline limits, flattened from the config sections that feed them.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_message_chars: usize,
    pub max_query_chars: usize,
    pub history_turns: usize,
    pub display_rows: usize,
    pub display_cell_chars: usize,
    pub statement_timeout: Duration,
    pub max_rows: usize,
    pub llm_timeout: Duration,
    pub retry_backoff: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &CostlensConfig) -> Self {
        Self {
            max_message_chars: config.agent.max_message_chars,
            max_query_chars: config.agent.max_query_chars,
            history_turns: config.agent.history_turns,
            display_rows: config.agent.display_rows,
            display_cell_chars: config.agent.display_cell_chars,
            statement_timeout: Duration::from_millis(config.database.statement_timeout_ms),
            max_rows: config.database.max_rows,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            retry_backoff: Duration::from_millis(config.llm.retry_backoff_ms),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&CostlensConfig::default())
    }
}
