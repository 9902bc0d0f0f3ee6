//! Query validation: the firewall between LLM output and the database.
//!
//! Model output is treated as untrusted input. Rules run in order and the
//! first failure wins:
//!
//! 1. length cap (`TooLong`)
//! 2. must start with SELECT once comments are gone (`NotSelect`)
//! 3. a single statement, optionally ending in one `;` (`StackedStatements`)
//! 4. no denylisted keyword anywhere, comments included (`ForbiddenKeyword:<KW>`)
//! 5. only documented tables, no system catalogs (`OutOfScope`)
//! 6. no tautologies or resource-abusing functions (`SuspiciousPattern:<name>`)
//!
//! This is a denylist over a small lexer, not a SQL parser. The read-only
//! session the executor uses is the second layer.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use costlens_core::AppSchema;

use crate::types::{CandidateQuery, ValidationOutcome};

/// Why a candidate statement was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TooLong,
    NotSelect,
    StackedStatements,
    ForbiddenKeyword(String),
    OutOfScope(String),
    SuspiciousPattern(String),
}

impl RejectReason {
    /// Stable code shown to users and written to logs.
    pub fn code(&self) -> String {
        match self {
            RejectReason::TooLong => "TooLong".to_string(),
            RejectReason::NotSelect => "NotSelect".to_string(),
            RejectReason::StackedStatements => "StackedStatements".to_string(),
            RejectReason::ForbiddenKeyword(kw) => format!("ForbiddenKeyword:{}", kw),
            RejectReason::OutOfScope(_) => "OutOfScope".to_string(),
            RejectReason::SuspiciousPattern(name) => format!("SuspiciousPattern:{}", name),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

// =============================================================================
// Patterns
// =============================================================================

/// Keywords that never belong in a read-only query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "CALL", "MERGE", "CREATE", "ATTACH", "DETACH", "COPY", "VACUUM", "PRAGMA",
];

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"))).unwrap()
});

static NUMERIC_TAUTOLOGY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bor\s+(\d+)\s*=\s*(\d+)\b").unwrap());

static STRING_TAUTOLOGY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bor\s+'([^']*)'\s*=\s*'([^']*)'").unwrap());

static TRUE_TAUTOLOGY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bor\s+true\b").unwrap());

static DANGEROUS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(load_extension|randomblob|zeroblob|sleep|pg_sleep|benchmark|readfile|writefile|fts3_tokenizer)\s*\(",
    )
    .unwrap()
});

/// Words that open a subquery where a table could also appear.
const SUBQUERY_START: &[&str] = &["SELECT", "WITH", "VALUES"];

/// Keywords that close a FROM clause at the current nesting depth.
const CLAUSE_END: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "UNION", "EXCEPT", "INTERSECT", "WINDOW",
];

// =============================================================================
// Lexing
// =============================================================================

/// Remove comments and collapse whitespace outside string literals and
/// quoted identifiers. With `comments_as_space` unset, comments vanish
/// entirely, so `DR/**/OP` reads as `DROP`.
pub fn scrub(sql: &str, comments_as_space: bool) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    let mut pending_space = false;

    let flush_space = |out: &mut String, pending: &mut bool| {
        if *pending && !out.is_empty() {
            out.push(' ');
        }
        *pending = false;
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' | '[' => {
                flush_space(&mut out, &mut pending_space);
                let end = quoted_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                pending_space |= comments_as_space;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                pending_space |= comments_as_space;
            }
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            c => {
                flush_space(&mut out, &mut pending_space);
                out.push(c);
                i += 1;
            }
        }
    }
    out.trim().to_string()
}

/// Index just past the quoted run starting at `start`. Doubled closing
/// quotes are escapes; an unterminated run extends to the end.
fn quoted_end(chars: &[char], start: usize) -> usize {
    let close = match chars[start] {
        '[' => ']',
        c => c,
    };
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if close != ']' && chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Identifier or keyword, quotes removed, qualified parts joined by `.`.
    Word(String),
    /// String literal contents, doubled quotes collapsed.
    Literal(String),
    Punct(char),
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let end = quoted_end(&chars, i);
            let inner_end = if end > i + 1 && chars[end - 1] == '\'' { end - 1 } else { end };
            let text: String = chars[i + 1..inner_end].iter().collect();
            tokens.push(Token::Literal(text.replace("''", "'")));
            i = end;
        } else if matches!(c, '"' | '`' | '[') || is_ident_char(c) {
            let mut name = String::new();
            loop {
                let part_end = if matches!(chars[i], '"' | '`' | '[') {
                    let end = quoted_end(&chars, i);
                    let inner_end = if end > i + 1 && end <= chars.len() { end - 1 } else { end };
                    name.extend(&chars[i + 1..inner_end.max(i + 1)]);
                    end
                } else {
                    let mut j = i;
                    while j < chars.len() && is_ident_char(chars[j]) {
                        j += 1;
                    }
                    name.extend(&chars[i..j]);
                    j
                };
                i = part_end;
                let continues = chars.get(i) == Some(&'.')
                    && chars
                        .get(i + 1)
                        .is_some_and(|&n| is_ident_char(n) || matches!(n, '"' | '`' | '['));
                if !continues {
                    break;
                }
                name.push('.');
                i += 1;
            }
            tokens.push(Token::Word(name));
        } else {
            tokens.push(Token::Punct(c));
            i += 1;
        }
    }
    tokens
}

fn is_system_identifier(word: &str) -> bool {
    word.split('.').any(|part| {
        let part = part.to_ascii_lowercase();
        part == "information_schema"
            || part == "sys"
            || part == "mysql"
            || part.starts_with("pg_")
            || part.starts_with("sqlite_")
            || part.starts_with("pragma_")
    })
}

// =============================================================================
// QueryValidator
// =============================================================================

/// Accepts or rejects candidate statements against a fixed table set.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    schema: AppSchema,
    max_chars: usize,
}

impl QueryValidator {
    pub fn new(schema: AppSchema, max_chars: usize) -> Self {
        Self { schema, max_chars }
    }

    pub fn validate(&self, candidate: &CandidateQuery) -> ValidationOutcome {
        match self.check(&candidate.raw) {
            Ok(normalized) => ValidationOutcome::Accepted(normalized),
            Err((reason, detail)) => ValidationOutcome::Rejected { reason, detail },
        }
    }

    fn check(&self, raw: &str) -> Result<String, (RejectReason, String)> {
        // 1
        let length = raw.chars().count();
        if length > self.max_chars {
            return Err((
                RejectReason::TooLong,
                format!("query is {} characters, limit {}", length, self.max_chars),
            ));
        }

        // 2
        let normalized = scrub(raw, true);
        let tokens = tokenize(&normalized);
        match tokens.first() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("SELECT") => {}
            _ => {
                return Err((
                    RejectReason::NotSelect,
                    "statement does not start with SELECT".to_string(),
                ))
            }
        }

        // 3
        let body = normalized.strip_suffix(';').unwrap_or(&normalized).trim_end();
        if body.contains(';') {
            return Err((
                RejectReason::StackedStatements,
                "more than one statement".to_string(),
            ));
        }

        // 4: raw text catches keywords behind `--`, the glued variant catches DR/**/OP.
        let glued = scrub(raw, false);
        for text in [raw, normalized.as_str(), glued.as_str()] {
            if let Some(m) = FORBIDDEN_RE.find(text) {
                let keyword = m.as_str().to_ascii_uppercase();
                return Err((
                    RejectReason::ForbiddenKeyword(keyword.clone()),
                    format!("contains forbidden keyword {}", keyword),
                ));
            }
        }

        // 5
        let body_tokens = tokenize(body);
        self.check_scope(&body_tokens)?;

        // 6
        if let Some(name) = suspicious_pattern(body) {
            return Err((
                RejectReason::SuspiciousPattern(name.to_string()),
                format!("matches suspicious pattern {}", name),
            ));
        }

        Ok(body.to_string())
    }

    fn check_scope(&self, tokens: &[Token]) -> Result<(), (RejectReason, String)> {
        // in_from[depth]: whether a FROM clause is open at that nesting depth.
        let mut in_from = vec![false];
        let mut expect_table = false;

        for token in tokens {
            match token {
                Token::Punct('(') if expect_table => {
                    // `FROM (t)` or `JOIN (a JOIN b)`: a table list until a SELECT shows up.
                    in_from.push(true);
                }
                Token::Punct('(') => {
                    in_from.push(false);
                }
                Token::Punct(')') => {
                    if in_from.len() > 1 {
                        in_from.pop();
                    }
                    expect_table = false;
                }
                Token::Punct(',') => {
                    expect_table = in_from.last().copied().unwrap_or(false);
                }
                Token::Literal(name) if expect_table => {
                    // SQLite takes a string in table position as a name.
                    expect_table = false;
                    self.check_table(name)?;
                }
                Token::Word(word) => {
                    if is_system_identifier(word) {
                        return Err(out_of_scope(word));
                    }
                    let upper = word.to_ascii_uppercase();
                    if expect_table {
                        expect_table = false;
                        if SUBQUERY_START.contains(&upper.as_str()) {
                            if let Some(open) = in_from.last_mut() {
                                *open = false;
                            }
                        } else {
                            self.check_table(word)?;
                            continue;
                        }
                    }
                    if upper == "FROM" || upper == "JOIN" {
                        if let Some(open) = in_from.last_mut() {
                            *open = true;
                        }
                        expect_table = true;
                    } else if CLAUSE_END.contains(&upper.as_str()) {
                        if let Some(open) = in_from.last_mut() {
                            *open = false;
                        }
                    }
                }
                Token::Literal(_) | Token::Punct(_) => {
                    expect_table = false;
                }
            }
        }
        Ok(())
    }

    /// Accept `name` only if it is a schema table, optionally `main.`-qualified.
    fn check_table(&self, name: &str) -> Result<(), (RejectReason, String)> {
        if is_system_identifier(name) {
            return Err(out_of_scope(name));
        }
        let table = match name.split_once('.') {
            None => name,
            Some((schema, table)) if schema.eq_ignore_ascii_case("main") && !table.contains('.') => {
                table
            }
            Some(_) => return Err(out_of_scope(name)),
        };
        if !self.schema.contains_table(table) {
            return Err(out_of_scope(table));
        }
        Ok(())
    }
}

fn out_of_scope(object: &str) -> (RejectReason, String) {
    (
        RejectReason::OutOfScope(object.to_string()),
        format!("references {} outside the application schema", object),
    )
}

fn suspicious_pattern(sql: &str) -> Option<&'static str> {
    let numeric = NUMERIC_TAUTOLOGY
        .captures_iter(sql)
        .any(|caps| caps[1].trim_start_matches('0') == caps[2].trim_start_matches('0'));
    let string = STRING_TAUTOLOGY
        .captures_iter(sql)
        .any(|caps| caps[1] == caps[2]);
    if numeric || string || TRUE_TAUTOLOGY.is_match(sql) {
        return Some("tautology");
    }
    DANGEROUS_FUNCTION.captures(sql).map(|caps| {
        match caps[1].to_ascii_lowercase().as_str() {
            "load_extension" => "load_extension",
            "randomblob" => "randomblob",
            "zeroblob" => "zeroblob",
            "pg_sleep" => "pg_sleep",
            "benchmark" => "benchmark",
            "readfile" => "readfile",
            "writefile" => "writefile",
            "fts3_tokenizer" => "fts3_tokenizer",
            _ => "sleep",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_validator() -> QueryValidator {
        QueryValidator::new(AppSchema::cost_dashboard(), 2000)
    }

    fn outcome(sql: &str) -> ValidationOutcome {
        make_validator().validate(&CandidateQuery::found(sql))
    }

    fn reason(sql: &str) -> RejectReason {
        match outcome(sql) {
            ValidationOutcome::Rejected { reason, .. } => reason,
            ValidationOutcome::Accepted(q) => panic!("expected rejection, accepted: {}", q),
        }
    }

    fn accepted(sql: &str) -> String {
        match outcome(sql) {
            ValidationOutcome::Accepted(q) => q,
            ValidationOutcome::Rejected { reason, detail } => {
                panic!("expected acceptance, rejected {}: {}", reason, detail)
            }
        }
    }

    // ---- acceptance ----

    #[test]
    fn test_plain_select_with_trailing_semicolon() {
        assert_eq!(accepted("SELECT * FROM project;"), "SELECT * FROM project");
    }

    #[test]
    fn test_normalization_strips_comments_and_whitespace() {
        let sql = "SELECT project_name,   -- the name\n  deployed_region /* region */\nFROM project\nWHERE is_active = 1";
        assert_eq!(
            accepted(sql),
            "SELECT project_name, deployed_region FROM project WHERE is_active = 1"
        );
    }

    #[test]
    fn test_literals_kept_verbatim() {
        assert_eq!(
            accepted("SELECT * FROM project WHERE project_name = 'A  --  B'"),
            "SELECT * FROM project WHERE project_name = 'A  --  B'"
        );
    }

    #[test]
    fn test_joins_aliases_and_subqueries() {
        accepted(
            "SELECT p.project_name, SUM(m.cost) AS total
             FROM project p
             JOIN monthly_cost m ON m.project_id = p.id
             LEFT JOIN resource_group AS rg ON rg.id = m.resource_group_id
             GROUP BY p.project_name ORDER BY total DESC LIMIT 5",
        );
        accepted("SELECT * FROM (SELECT id FROM project) sub, resource_group r WHERE r.project_id = sub.id");
        accepted("SELECT * FROM main.project");
        accepted("SELECT COUNT(*) FROM \"project\"");
        accepted("select id from PROJECT where id in (select project_id from aiq_consumption)");
    }

    #[test]
    fn test_column_names_containing_keywords() {
        accepted("SELECT updated_date, created_by_name FROM project_cost_summary");
    }

    // ---- rule 1 ----

    #[test]
    fn test_too_long() {
        let sql = format!("SELECT * FROM project WHERE project_name = '{}'", "x".repeat(2000));
        assert_eq!(reason(&sql), RejectReason::TooLong);
    }

    // ---- rule 2 ----

    #[test]
    fn test_not_select() {
        assert_eq!(reason("WITH x AS (SELECT 1) SELECT * FROM x"), RejectReason::NotSelect);
        assert_eq!(reason("EXPLAIN SELECT * FROM project"), RejectReason::NotSelect);
        assert_eq!(reason("-- only a comment"), RejectReason::NotSelect);
        assert_eq!(reason("SELECTED * FROM project"), RejectReason::NotSelect);
        assert_eq!(reason("DELETE FROM project"), RejectReason::NotSelect);
    }

    #[test]
    fn test_select_after_leading_comment() {
        accepted("/* lookup */ -- active\nselect * from project");
    }

    // ---- rule 3 ----

    #[test]
    fn test_stacked_statements() {
        assert_eq!(
            reason("SELECT 1; DROP TABLE project;"),
            RejectReason::StackedStatements
        );
        assert_eq!(reason("SELECT * FROM project;;"), RejectReason::StackedStatements);
        assert_eq!(
            reason("SELECT * FROM project; SELECT * FROM cost_data"),
            RejectReason::StackedStatements
        );
    }

    #[test]
    fn test_semicolon_hidden_behind_literal_quote() {
        assert_eq!(
            reason("SELECT '--'; DROP TABLE project"),
            RejectReason::StackedStatements
        );
    }

    // ---- rule 4 ----

    #[test]
    fn test_forbidden_keywords_anywhere() {
        for kw in ["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "GRANT", "EXEC"] {
            let variants = [
                format!("SELECT * FROM project WHERE id IN ({} x)", kw),
                format!("SELECT * FROM project -- {} everything", kw.to_lowercase()),
                format!("SELECT * FROM project /* {} */", kw),
                format!("SELECT {} FROM project", kw.to_lowercase()),
            ];
            for sql in variants {
                assert_eq!(
                    reason(&sql),
                    RejectReason::ForbiddenKeyword(kw.to_string()),
                    "{}",
                    sql
                );
            }
        }
    }

    #[test]
    fn test_keyword_split_by_comment() {
        assert_eq!(
            reason("SELECT * FROM project WHERE DR/**/OP = 1"),
            RejectReason::ForbiddenKeyword("DROP".to_string())
        );
    }

    #[test]
    fn test_forbidden_code_format() {
        assert_eq!(
            RejectReason::ForbiddenKeyword("DELETE".to_string()).code(),
            "ForbiddenKeyword:DELETE"
        );
        assert_eq!(RejectReason::OutOfScope("x".to_string()).code(), "OutOfScope");
    }

    // ---- rule 5 ----

    #[test]
    fn test_system_catalogs_out_of_scope() {
        for sql in [
            "SELECT * FROM sqlite_master",
            "SELECT name FROM sqlite_schema WHERE type = 'table'",
            "SELECT * FROM information_schema.tables",
            "SELECT * FROM pg_catalog.pg_tables",
            "SELECT * FROM project WHERE id IN (SELECT rowid FROM sqlite_temp_master)",
            "SELECT * FROM pragma_table_info('project')",
            "SELECT sqlite_version()",
        ] {
            assert!(
                matches!(reason(sql), RejectReason::OutOfScope(_)),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_undocumented_tables_out_of_scope() {
        assert_eq!(
            reason("SELECT credentials FROM cloud_connection"),
            RejectReason::OutOfScope("cloud_connection".to_string())
        );
        assert_eq!(
            reason("SELECT * FROM project p JOIN secrets s ON s.id = p.id"),
            RejectReason::OutOfScope("secrets".to_string())
        );
        assert_eq!(
            reason("SELECT * FROM project, cloud_connection"),
            RejectReason::OutOfScope("cloud_connection".to_string())
        );
        assert_eq!(
            reason("SELECT * FROM (SELECT 1) a, cloud_connection c"),
            RejectReason::OutOfScope("cloud_connection".to_string())
        );
        assert!(matches!(
            reason("SELECT * FROM other_db.project"),
            RejectReason::OutOfScope(_)
        ));
    }

    #[test]
    fn test_parenthesised_and_quoted_tables_checked() {
        for sql in [
            "SELECT * FROM (cloud_connection)",
            "SELECT * FROM 'cloud_connection'",
            "SELECT * FROM project p JOIN (cloud_connection c) ON 1",
            "SELECT * FROM project NATURAL JOIN (cloud_connection)",
            "SELECT * FROM (project p JOIN cloud_connection c ON c.id = p.id)",
            "SELECT * FROM (project), ((cloud_connection))",
            "SELECT * FROM (SELECT credentials FROM cloud_connection)",
        ] {
            assert_eq!(
                reason(sql),
                RejectReason::OutOfScope("cloud_connection".to_string()),
                "{}",
                sql
            );
        }
        assert!(matches!(
            reason("SELECT * FROM 'sqlite_master'"),
            RejectReason::OutOfScope(_)
        ));

        accepted("SELECT * FROM (project)");
        accepted("SELECT * FROM 'project'");
        accepted("SELECT * FROM 'main.project'");
        accepted("SELECT * FROM (SELECT id FROM project) p");
        accepted("SELECT p.id FROM (project p JOIN monthly_cost m ON m.project_id = p.id)");
    }

    #[test]
    fn test_table_name_inside_literal_is_fine() {
        accepted("SELECT * FROM project WHERE description = 'from cloud_connection'");
    }

    // ---- rule 6 ----

    #[test]
    fn test_tautologies() {
        let tautology = RejectReason::SuspiciousPattern("tautology".to_string());
        assert_eq!(reason("SELECT * FROM project WHERE 1=1 OR 1=1;"), tautology);
        assert_eq!(reason("SELECT * FROM project WHERE id = 5 OR 'a'='a'"), tautology);
        assert_eq!(reason("SELECT * FROM project WHERE id = 5 or true"), tautology);
        accepted("SELECT * FROM project WHERE id = 1 OR id = 2");
        accepted("SELECT * FROM project WHERE is_active = 1 OR 1 = 2");
    }

    #[test]
    fn test_dangerous_functions() {
        assert_eq!(
            reason("SELECT randomblob(1000000000) FROM project"),
            RejectReason::SuspiciousPattern("randomblob".to_string())
        );
        assert_eq!(
            reason("SELECT load_extension('evil') FROM project"),
            RejectReason::SuspiciousPattern("load_extension".to_string())
        );
        assert_eq!(
            reason("SELECT SLEEP (5) FROM project"),
            RejectReason::SuspiciousPattern("sleep".to_string())
        );
    }

    // ---- ordering ----

    #[test]
    fn test_first_failing_rule_wins() {
        // Stacked beats keyword.
        assert_eq!(
            reason("SELECT 1; DELETE FROM project"),
            RejectReason::StackedStatements
        );
        // Keyword beats scope.
        assert_eq!(
            reason("SELECT * FROM cloud_connection WHERE 'x' = 'drop'"),
            RejectReason::ForbiddenKeyword("DROP".to_string())
        );
    }

    // ---- lexer ----

    #[test]
    fn test_scrub_unterminated_block_comment() {
        assert_eq!(scrub("SELECT 1 /* open", true), "SELECT 1");
    }

    #[test]
    fn test_scrub_keeps_doubled_quotes() {
        assert_eq!(
            scrub("SELECT 'it''s   fine'  ,\n 2", true),
            "SELECT 'it''s   fine' , 2"
        );
    }

    #[test]
    fn test_tokenize_qualified_names() {
        let tokens = tokenize("SELECT \"main\".\"project\".id FROM main.project");
        assert_eq!(tokens[1], Token::Word("main.project.id".to_string()));
        assert_eq!(tokens[3], Token::Word("main.project".to_string()));
    }
}
