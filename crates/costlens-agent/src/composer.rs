//! Response composition.
//!
//! Merges the model's prose with the validator and executor outcomes into the
//! final answer and records the exchange in the conversation store.

use costlens_core::error::CostlensError;

use crate::executor::ExecutionErrorKind;
use crate::extractor::strip_sql_blocks;
use crate::store::ConversationStore;
use crate::types::{CandidateQuery, ChatResponse, ExecutionResult, Turn, ValidationOutcome};

/// Shown when the LLM cannot be reached.
pub const UNAVAILABLE_MESSAGE: &str =
    "The assistant is temporarily unavailable. Please try again in a moment.";

/// Everything one request produced, ready to be turned into an answer.
#[derive(Debug, Clone, Copy)]
pub struct Draft<'a> {
    pub llm_text: &'a str,
    pub candidate: &'a CandidateQuery,
    pub outcome: Option<&'a ValidationOutcome>,
    pub execution: Option<&'a Result<ExecutionResult, ExecutionErrorKind>>,
}

/// Formats answers and query results.
#[derive(Debug, Clone)]
pub struct ResponseComposer {
    display_rows: usize,
    cell_chars: usize,
}

impl ResponseComposer {
    pub fn new(display_rows: usize, cell_chars: usize) -> Self {
        Self {
            display_rows: display_rows.max(1),
            cell_chars: cell_chars.max(4),
        }
    }

    /// Build the answer without touching history.
    pub fn compose(&self, draft: &Draft<'_>, conversation_id: &str) -> ChatResponse {
        let (response, sql_query) = match (draft.candidate.extracted, draft.outcome) {
            (false, _) | (true, None) => (draft.llm_text.to_string(), None),
            (true, Some(ValidationOutcome::Rejected { reason, .. })) => (
                format!(
                    "I can't run the query for this request: it was blocked by the query safety policy ({}). \
                     Please rephrase your question as a read-only question about projects, resource groups or costs.",
                    reason.code()
                ),
                None,
            ),
            (true, Some(ValidationOutcome::Accepted(query))) => {
                let prose = strip_sql_blocks(draft.llm_text);
                let tail = match draft.execution {
                    Some(Ok(result)) => self.render_result(result),
                    Some(Err(kind)) => execution_failure(*kind),
                    None => execution_failure(ExecutionErrorKind::Unknown),
                };
                let response = if prose.is_empty() {
                    tail
                } else {
                    format!("{}\n\n{}", prose, tail)
                };
                (response, Some(query.clone()))
            }
        };

        ChatResponse {
            response,
            sql_query,
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Compose the answer, then append the user turn and the answer to history.
    pub fn compose_and_record(
        &self,
        store: &dyn ConversationStore,
        conversation_id: &str,
        user_message: &str,
        draft: &Draft<'_>,
    ) -> Result<ChatResponse, CostlensError> {
        let response = self.compose(draft, conversation_id);
        store.append_all(
            conversation_id,
            vec![
                Turn::user(user_message),
                Turn::assistant(response.response.clone()),
            ],
        )?;
        Ok(response)
    }

    /// Generic answer for a failed LLM call.
    pub fn unavailable(&self, conversation_id: &str) -> ChatResponse {
        ChatResponse {
            response: UNAVAILABLE_MESSAGE.to_string(),
            sql_query: None,
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Compact text rendering of up to `display_rows` rows.
    pub fn render_result(&self, result: &ExecutionResult) -> String {
        let mut out = String::from("Query Results:\n");
        out.push_str(&self.format_rows(result));
        if result.truncated {
            out.push_str(&format!(
                "\n(Results were limited to the first {} rows.)",
                result.row_count
            ));
        }
        out
    }

    fn format_rows(&self, result: &ExecutionResult) -> String {
        match result.rows.as_slice() {
            [] => "No results found.".to_string(),
            [row] => result
                .columns
                .iter()
                .zip(row)
                .map(|(col, value)| format!("{}: {}", col, self.cell(value)))
                .collect::<Vec<_>>()
                .join("\n"),
            rows => {
                let mut lines = Vec::with_capacity(self.display_rows + 2);
                lines.push(result.columns.join(" | "));
                for row in rows.iter().take(self.display_rows) {
                    let cells: Vec<String> = row.iter().map(|v| self.cell(v)).collect();
                    lines.push(cells.join(" | "));
                }
                if rows.len() > self.display_rows {
                    lines.push(format!("... and {} more rows", rows.len() - self.display_rows));
                }
                lines.join("\n")
            }
        }
    }

    fn cell(&self, value: &serde_json::Value) -> String {
        let text = match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.chars().count() > self.cell_chars {
            let cut: String = text.chars().take(self.cell_chars - 3).collect();
            format!("{}...", cut)
        } else {
            text
        }
    }
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self::new(10, 50)
    }
}

fn execution_failure(kind: ExecutionErrorKind) -> String {
    let hint = match kind {
        ExecutionErrorKind::Timeout => "it took too long to run",
        ExecutionErrorKind::SyntaxError => "the generated SQL was not valid for this database",
        ExecutionErrorKind::PermissionDenied => "it needed access that is not allowed",
        ExecutionErrorKind::Unknown => "of an internal error",
    };
    format!(
        "The query could not be completed because {} ({}). Please try rephrasing your question.",
        hint, kind
    )
}
