//! Read-only SQL policy.
//!
//! [`SqlValidator::validate`] decides whether a statement may reach the
//! database. It is pure and deterministic: the same text under the same
//! policy always yields the same verdict. The validator only accepts or
//! rejects; the normalized text it returns differs from the input only in
//! comments, whitespace and a trailing semicolon.
//!
//! All matching runs on the token stream from [`crate::sql::lexer`], so a
//! blacklisted word inside an identifier (`deleted_at`), a string literal or
//! a quoted identifier never triggers a rejection.

use crate::error::{DbError, DbResult};
use crate::sql::lexer::{self, Token, TokenKind};
use serde::Serialize;
use std::collections::BTreeSet;

/// Rejection reasons returned to callers.
mod reasons {
    pub const EMPTY: &str = "empty statement";
    pub const NOT_READ_ONLY: &str = "non-read-only statement";
    pub const MUST_START_WITH_SELECT: &str =
        "non-read-only statement: queries must begin with SELECT or WITH";
    pub const STACKED: &str = "multiple statements are not allowed";
    pub const SELECT_INTO: &str = "non-read-only statement: SELECT INTO creates a table";
}

/// Statement keywords that modify data, schema, or server state.
pub const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXECUTE", "CALL", "COPY", "VACUUM", "MERGE", "EXEC",
];

/// Functions with side effects or filesystem, network, or session access.
pub const DEFAULT_BLOCKED_FUNCTIONS: &[&str] = &[
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "pg_stat_file",
    "lo_import",
    "lo_export",
    "pg_sleep",
    "set_config",
    "nextval",
    "setval",
    "dblink",
    "dblink_exec",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "load_file",
    "xp_cmdshell",
];

/// Schemas a UNION may not reach into.
pub const DEFAULT_BLOCKED_UNION_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

/// Catalog relations reachable without a schema prefix.
pub const DEFAULT_BLOCKED_UNION_RELATIONS: &[&str] = &[
    "pg_shadow",
    "pg_authid",
    "pg_user",
    "pg_roles",
    "pg_user_mapping",
    "pg_user_mappings",
    "pg_settings",
    "pg_file_settings",
    "pg_hba_file_rules",
    "pg_stat_activity",
];

/// The complete, enumerable read-only policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Upper-case keywords rejected anywhere outside literals.
    pub blocked_keywords: BTreeSet<String>,
    /// Lower-case function names rejected when called.
    pub blocked_functions: BTreeSet<String>,
    /// Lower-case schema names a UNION may not reference.
    pub blocked_union_schemas: BTreeSet<String>,
    /// Lower-case relation names a UNION may not reference.
    pub blocked_union_relations: BTreeSet<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            blocked_keywords: DEFAULT_BLOCKED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            blocked_functions: DEFAULT_BLOCKED_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
            blocked_union_schemas: DEFAULT_BLOCKED_UNION_SCHEMAS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocked_union_relations: DEFAULT_BLOCKED_UNION_RELATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ValidationPolicy {
    fn is_blocked_keyword(&self, word: &str) -> bool {
        self.blocked_keywords.contains(&word.to_ascii_uppercase())
    }
}

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Comment-free, whitespace-collapsed text; this is what gets executed.
    pub normalized_query: String,
}

impl ValidationVerdict {
    fn allow(normalized_query: String) -> Self {
        Self {
            allowed: true,
            reason: None,
            normalized_query,
        }
    }

    fn reject(reason: impl Into<String>, normalized_query: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            normalized_query,
        }
    }

    /// Convert into the executable text, or a `ValidationRejected` error.
    pub fn into_result(self) -> DbResult<String> {
        if self.allowed {
            Ok(self.normalized_query)
        } else {
            Err(DbError::rejected(
                self.reason.unwrap_or_else(|| reasons::NOT_READ_ONLY.to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    policy: ValidationPolicy,
}

impl SqlValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Decide whether `raw_query` is a single read-only statement.
    pub fn validate(&self, raw_query: &str) -> ValidationVerdict {
        let tokens = match lexer::tokenize(raw_query) {
            Ok(tokens) => tokens,
            Err(e) => {
                let collapsed = raw_query.split_whitespace().collect::<Vec<_>>().join(" ");
                return ValidationVerdict::reject(format!("malformed statement: {}", e), collapsed);
            }
        };

        if let Some(word) = self.comment_fragmented_keyword(&tokens) {
            return ValidationVerdict::reject(
                format!("suspicious comment inside keyword {}", word),
                normalize(&tokens),
            );
        }

        let mut sig: Vec<Token<'_>> = tokens.iter().copied().filter(|t| !t.is_trivia()).collect();

        // Stacked statements: nothing may follow the first top-level semicolon
        if let Some(idx) = sig.iter().position(|t| t.is_punct(";")) {
            if idx + 1 < sig.len() {
                return ValidationVerdict::reject(reasons::STACKED, normalize(&tokens));
            }
            sig.truncate(idx);
        }

        let normalized = join_tokens(&sig);
        if sig.is_empty() {
            return ValidationVerdict::reject(reasons::EMPTY, normalized);
        }

        if let Some(reason) = self.check_leading_keyword(&sig) {
            return ValidationVerdict::reject(reason, normalized);
        }
        if let Some(reason) = self.check_blocked_keywords(&sig) {
            return ValidationVerdict::reject(reason, normalized);
        }
        if sig.iter().any(|t| t.is_keyword("INTO")) {
            return ValidationVerdict::reject(reasons::SELECT_INTO, normalized);
        }
        if let Some(reason) = self.check_blocked_functions(&sig) {
            return ValidationVerdict::reject(reason, normalized);
        }
        if let Some(reason) = self.check_union(&sig) {
            return ValidationVerdict::reject(reason, normalized);
        }

        ValidationVerdict::allow(normalized)
    }

    /// The first keyword, after any opening parentheses, must be SELECT or WITH.
    fn check_leading_keyword(&self, sig: &[Token<'_>]) -> Option<String> {
        let first = sig.iter().find(|t| !t.is_punct("("))?;
        if first.is_keyword("SELECT") || first.is_keyword("WITH") {
            return None;
        }
        if first.is_word() && self.policy.is_blocked_keyword(first.text) {
            return Some(write_reason(first.text));
        }
        Some(reasons::MUST_START_WITH_SELECT.to_string())
    }

    fn check_blocked_keywords(&self, sig: &[Token<'_>]) -> Option<String> {
        sig.iter().enumerate().find_map(|(i, tok)| {
            // `t.delete` is a qualified column name, not a statement keyword
            let qualified = i > 0 && sig[i - 1].is_punct(".");
            (tok.is_word() && !qualified && self.policy.is_blocked_keyword(tok.text))
                .then(|| write_reason(tok.text))
        })
    }

    fn check_blocked_functions(&self, sig: &[Token<'_>]) -> Option<String> {
        sig.windows(2).find_map(|pair| {
            let name = pair[0].ident_name()?;
            (pair[1].is_punct("(") && self.policy.blocked_functions.contains(&name))
                .then(|| format!("blocked function call: {}", name))
        })
    }

    /// A UNION may not pull rows out of the system catalogs, whichever
    /// branch names them.
    fn check_union(&self, sig: &[Token<'_>]) -> Option<String> {
        if !sig.iter().any(|t| t.is_keyword("UNION")) {
            return None;
        }
        sig.iter().enumerate().find_map(|(i, tok)| {
            let name = tok.ident_name()?;
            let followed_by_dot = sig.get(i + 1).is_some_and(|t| t.is_punct("."));
            if followed_by_dot && self.policy.blocked_union_schemas.contains(&name) {
                return Some(format!("suspicious UNION referencing catalog schema {}", name));
            }
            if self.policy.blocked_union_relations.contains(&name) {
                return Some(format!("suspicious UNION referencing catalog relation {}", name));
            }
            None
        })
    }

    /// Detect words glued together by comments, e.g. `DEL/**/ETE`.
    fn comment_fragmented_keyword(&self, tokens: &[Token<'_>]) -> Option<String> {
        let mut i = 0;
        while i < tokens.len() {
            if !tokens[i].is_word() {
                i += 1;
                continue;
            }
            let mut glued = tokens[i].text.to_string();
            let mut pieces = 1;
            let mut j = i + 1;
            while j + 1 < tokens.len()
                && tokens[j].kind == TokenKind::Comment
                && tokens[j + 1].is_word()
            {
                glued.push_str(tokens[j + 1].text);
                pieces += 1;
                j += 2;
            }
            if pieces > 1 {
                let upper = glued.to_ascii_uppercase();
                if upper == "UNION" || self.policy.blocked_keywords.contains(&upper) {
                    return Some(upper);
                }
            }
            i = j;
        }
        None
    }
}

/// Validate with the default policy and return the executable text.
pub fn validate_readonly(sql: &str) -> DbResult<String> {
    SqlValidator::default().validate(sql).into_result()
}

fn write_reason(keyword: &str) -> String {
    format!(
        "{}: {} is a disallowed write operation",
        reasons::NOT_READ_ONLY,
        keyword.to_ascii_uppercase()
    )
}

/// Collapse comments and whitespace in the full stream.
fn normalize(tokens: &[Token<'_>]) -> String {
    let sig: Vec<Token<'_>> = tokens.iter().copied().filter(|t| !t.is_trivia()).collect();
    join_tokens(&sig)
}

/// Join significant tokens, inserting one space wherever the source had any
/// gap (whitespace or a comment) between them.
fn join_tokens(sig: &[Token<'_>]) -> String {
    let mut out = String::new();
    let mut prev_end: Option<usize> = None;
    for tok in sig {
        if let Some(end) = prev_end {
            if tok.start > end {
                out.push(' ');
            }
        }
        out.push_str(tok.text);
        prev_end = Some(tok.end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(sql: &str) -> ValidationVerdict {
        SqlValidator::default().validate(sql)
    }

    #[test]
    fn test_simple_select_allowed() {
        let v = check("SELECT * FROM users");
        assert!(v.allowed);
        assert!(v.reason.is_none());
        assert_eq!(v.normalized_query, "SELECT * FROM users");
    }

    #[test]
    fn test_with_allowed() {
        assert!(check("WITH a AS (SELECT 1) SELECT * FROM a").allowed);
    }

    #[test]
    fn test_leading_write_keyword_named() {
        let v = check("DELETE FROM users");
        assert!(!v.allowed);
        let reason = v.reason.unwrap();
        assert!(reason.starts_with("non-read-only statement"));
        assert!(reason.contains("DELETE"));
    }

    #[test]
    fn test_other_leading_keyword() {
        let v = check("SHOW search_path");
        assert_eq!(v.reason.as_deref(), Some(reasons::MUST_START_WITH_SELECT));
    }

    #[test]
    fn test_normalization_strips_comments_and_semicolon() {
        let v = check("  SELECT  id,\n\tname -- trailing\n FROM /* x */ users ;  ");
        assert!(v.allowed);
        assert_eq!(v.normalized_query, "SELECT id, name FROM users");
    }

    #[test]
    fn test_normalization_preserves_literal_whitespace_and_case() {
        let v = check("select 'a   B' as \"Col  X\"");
        assert_eq!(v.normalized_query, "select 'a   B' as \"Col  X\"");
    }

    #[test]
    fn test_adjacent_tokens_stay_adjacent() {
        let v = check("SELECT count(*)::int FROM t");
        assert_eq!(v.normalized_query, "SELECT count(*)::int FROM t");
    }

    #[test]
    fn test_qualified_column_named_like_keyword() {
        assert!(check("SELECT t.update FROM t").allowed);
    }

    #[test]
    fn test_select_into_rejected() {
        let v = check("SELECT * INTO backup FROM users");
        assert_eq!(v.reason.as_deref(), Some(reasons::SELECT_INTO));
    }

    #[test]
    fn test_blocked_function_rejected() {
        let v = check("SELECT pg_sleep(10)");
        assert!(v.reason.unwrap().contains("pg_sleep"));
        assert!(!check("SELECT pg_catalog.pg_read_file('/etc/passwd')").allowed);
    }

    #[test]
    fn test_blocked_function_name_as_column_allowed() {
        assert!(check("SELECT nextval FROM counters").allowed);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(validate_readonly("SELECT 1;").unwrap(), "SELECT 1");
        assert!(matches!(
            validate_readonly("DROP TABLE x"),
            Err(DbError::ValidationRejected { .. })
        ));
    }

    #[test]
    fn test_custom_policy() {
        let mut policy = ValidationPolicy::default();
        policy.blocked_functions.insert("current_user_secret".into());
        let validator = SqlValidator::new(policy);
        assert!(!validator.validate("SELECT current_user_secret()").allowed);
    }
}
