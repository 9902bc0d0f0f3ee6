//! Error types for the SQL assistant.
//!
//! Only malformed requests surface as errors. Everything that goes wrong
//! after a request is accepted is folded into a normal chat response.

/// A chat request rejected before it reaches the LLM.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("message contains control characters")]
    InvalidCharacters,
    #[error("message must not contain markup")]
    MarkupNotAllowed,
    #[error("conversation id must be 1-128 characters of letters, digits, '-' or '_'")]
    InvalidConversationId,
}
