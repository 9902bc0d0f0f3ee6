//! SQL extraction from LLM replies.
//!
//! Only a fenced block tagged `sql` counts. Untagged blocks and bare SELECT
//! text in prose are ignored.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::CandidateQuery;

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```[ \t]*sql\b[^\S\n]*(.*?)```").unwrap());

/// Pull the first ```` ```sql ```` block out of `llm_text`.
///
/// Later blocks are ignored. An empty block counts as no candidate.
pub fn extract(llm_text: &str) -> CandidateQuery {
    SQL_FENCE
        .captures(llm_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|sql| !sql.is_empty())
        .map(CandidateQuery::found)
        .unwrap_or_else(CandidateQuery::none)
}

/// Reply text with every ```` ```sql ```` block removed, for display.
pub fn strip_sql_blocks(llm_text: &str) -> String {
    let stripped = SQL_FENCE.replace_all(llm_text, "");
    let lines: Vec<&str> = stripped.lines().map(str::trim_end).collect();
    let mut out = lines.join("\n");
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_string()
}
