//! Prompt construction.
//!
//! The system section is rendered once from the schema description. Each
//! request then adds the retained turns and the new message as separate
//! sections, so user text can never land inside the schema section.

use serde::Serialize;

use costlens_core::AppSchema;

use crate::types::{Conversation, Role, Turn};

const ROLE_INSTRUCTIONS: &str = "\
You are a SQL-Agent assistant for a multi-cloud cost dashboard.
Answer questions ONLY from the database schema below. You must:
1. Never make up data or answer from outside the schema.
2. When data is needed, write exactly one read-only SQLite SELECT statement
   inside a single ```sql fenced block.
3. Never write INSERT, UPDATE, DELETE, DDL or more than one statement.
4. Keep prose short; the query results are appended to your answer.
If the question cannot be answered from the schema, say so politely.";

/// A role-tagged prompt message, in chat-completions shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

/// A fully assembled prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub history: Vec<Turn>,
    pub user: String,
}

impl Prompt {
    /// Plain-text rendering for completion-style backends and logs.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.system.len() + self.user.len() + self.history.len() * 128 + 64,
        );
        out.push_str("### System\n");
        out.push_str(&self.system);
        out.push_str("\n\n### Conversation\n");
        for turn in &self.history {
            let label = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push('\n');
        }
        out.push_str("\n### User\n");
        out.push_str(&self.user);
        out
    }

    /// System, history and the new message as chat-completion messages.
    pub fn messages(&self) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(PromptMessage {
            role: "system",
            content: self.system.clone(),
        });
        messages.extend(self.history.iter().map(|turn| PromptMessage {
            role: turn.role.as_str(),
            content: turn.content.clone(),
        }));
        messages.push(PromptMessage {
            role: "user",
            content: self.user.clone(),
        });
        messages
    }
}

/// Builds prompts against a fixed system section.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
}

impl PromptBuilder {
    pub fn new(schema: &AppSchema) -> Self {
        Self {
            system: format!("{}\n\n{}", ROLE_INSTRUCTIONS, schema.describe()),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    pub fn build(&self, conversation: &Conversation, new_message: &str) -> Prompt {
        Prompt {
            system: self.system.clone(),
            history: conversation.turns.clone(),
            user: new_message.to_string(),
        }
    }
}
