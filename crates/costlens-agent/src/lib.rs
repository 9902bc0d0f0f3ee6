//! Costlens agent crate - the natural-language SQL assistant.
//!
//! Turns a chat message into an LLM prompt, extracts and validates any SQL
//! the model proposes, runs accepted statements against a bounded read-only
//! pool, and folds the outcome back into a conversational answer.

pub mod agent;
pub mod composer;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod llm;
pub mod prompt;
pub mod store;
pub mod types;
pub mod validator;

pub use agent::SqlAgent;
pub use composer::ResponseComposer;
pub use error::ChatError;
pub use executor::{ExecutionErrorKind, QueryExecutor};
pub use extractor::extract;
pub use llm::{client_from_config, ChatCompletionsClient, LlmClient, LlmError, UnconfiguredLlm};
pub use prompt::{Prompt, PromptBuilder, PromptMessage};
pub use store::{ConversationStore, InMemoryConversationStore};
pub use types::{
    AgentSettings, CandidateQuery, ChatRequest, ChatResponse, Conversation, ExecutionResult, Role,
    Turn, ValidationOutcome,
};
pub use validator::{QueryValidator, RejectReason};
