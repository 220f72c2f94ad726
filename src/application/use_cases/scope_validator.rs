//! Access Scope Validator
//!
//! Gate for SQL run on behalf of restricted callers:
//! - Structure: a single read-only SELECT, no deny-listed keywords, no
//!   statement separators, no comments, no `OR x = x` tautologies
//! - Scope: at least one recognized filter on the caller's own person ids
//!
//! States move `Unchecked → StructureChecked → ScopeChecked → Approved`, or
//! stop at `Rejected`. Deny by default: SQL is approved only when a known
//! filter spelling for the live scope is found.

use crate::domain::error::{AppError, Result};
use crate::domain::template::CallerScope;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static TAUTOLOGY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bor\s+('?[\w.]+'?)\s*=\s*('?[\w.]+'?)").unwrap()
});

static OR_TRUE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bor\s+(?:true|not\s+false)\b").unwrap());

/// Scope-filter spellings and deny list for one restricted role
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScopePolicy {
    /// Person-id column names, lowercase
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
    /// Accepted column qualifiers; the empty string means unqualified
    #[serde(default = "default_qualifiers")]
    pub qualifiers: Vec<String>,
    /// Table used by `IN (SELECT id FROM …)` / `EXISTS (…)` subquery filters
    #[serde(default = "default_subquery_table")]
    pub subquery_table: String,
    /// Words that cannot appear anywhere in the statement (case-insensitive)
    #[serde(default = "default_deny_keywords")]
    pub deny_keywords: Vec<String>,
}

fn default_columns() -> Vec<String> {
    vec!["idpersonne".to_string(), "id_personne".to_string()]
}

fn default_qualifiers() -> Vec<String> {
    vec![String::new(), "e.".to_string(), "eleve.".to_string()]
}

fn default_subquery_table() -> String {
    "eleve".to_string()
}

fn default_deny_keywords() -> Vec<String> {
    [
        "drop", "delete", "update", "insert", "truncate", "alter", "create", "grant", "revoke",
        "exec", "union",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            qualifiers: default_qualifiers(),
            subquery_table: default_subquery_table(),
            deny_keywords: default_deny_keywords(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationState {
    Unchecked,
    StructureChecked,
    ScopeChecked,
    Approved,
    Rejected,
}

/// Check that produced a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Structure,
    Scope,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
}

impl ValidationError {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
        }
    }
}

/// Outcome of one validation run, with the states it went through
#[derive(Debug, Clone, Serialize)]
pub struct ScopeVerdict {
    pub state: ValidationState,
    pub rejected_at: Option<ValidationStage>,
    pub errors: Vec<ValidationError>,
    pub matched_filter: Option<String>,
    pub trace: Vec<ValidationState>,
}

impl ScopeVerdict {
    pub fn is_approved(&self) -> bool {
        self.state == ValidationState::Approved
    }

    pub fn primary_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }

    /// `code: message` of the first error, for responses and logs
    pub fn reason(&self) -> String {
        match self.primary_error() {
            Some(e) => format!("{}: {}", e.code, e.message),
            None => "approved".to_string(),
        }
    }
}

pub struct ScopeValidator {
    policy: ScopePolicy,
    deny_patterns: Vec<(String, Regex)>,
}

impl ScopeValidator {
    pub fn new(policy: ScopePolicy) -> Result<Self> {
        let deny_patterns = policy
            .deny_keywords
            .iter()
            .map(|kw| {
                let kw = kw.trim().to_lowercase();
                Regex::new(&format!(r"\b{}\b", regex::escape(&kw)))
                    .map(|re| (kw.clone(), re))
                    .map_err(|e| AppError::ConfigError(format!("Invalid deny keyword '{}': {}", kw, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            policy,
            deny_patterns,
        })
    }

    pub fn policy(&self) -> &ScopePolicy {
        &self.policy
    }

    /// Run both stages for a restricted caller
    pub fn validate(&self, sql: &str, scope: &CallerScope) -> ScopeVerdict {
        let mut trace = vec![ValidationState::Unchecked];
        let normalized = normalize_sql(sql);

        let structure_errors = self.check_structure(&normalized);
        if !structure_errors.is_empty() {
            return self.reject(ValidationStage::Structure, structure_errors, trace, sql, scope);
        }
        trace.push(ValidationState::StructureChecked);

        if scope.is_empty() {
            let errors = vec![ValidationError::new(
                "EMPTY_SCOPE",
                "Caller has no authorized person ids",
            )];
            return self.reject(ValidationStage::Scope, errors, trace, sql, scope);
        }

        let matched = self
            .enumerate_filters(scope)
            .into_iter()
            .find(|pattern| contains_bounded(&normalized, pattern));
        let Some(matched) = matched else {
            let errors = vec![ValidationError::new(
                "MISSING_SCOPE_FILTER",
                format!(
                    "Query is not filtered on the authorized ids ({})",
                    scope.joined()
                ),
            )];
            return self.reject(ValidationStage::Scope, errors, trace, sql, scope);
        };
        trace.push(ValidationState::ScopeChecked);
        trace.push(ValidationState::Approved);

        debug!(filter = %matched, "Scope filter found, query approved");
        ScopeVerdict {
            state: ValidationState::Approved,
            rejected_at: None,
            errors: Vec::new(),
            matched_filter: Some(matched),
            trace,
        }
    }

    /// Structure stage alone, for callers that are not scope-restricted
    pub fn validate_structure(&self, sql: &str) -> Vec<ValidationError> {
        self.check_structure(&normalize_sql(sql))
    }

    fn check_structure(&self, normalized: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let body = normalized.strip_suffix(';').unwrap_or(normalized).trim_end();

        if body.is_empty() {
            errors.push(ValidationError::new("EMPTY_SQL", "Query is empty"));
            return errors;
        }

        if !(body.starts_with("select ") || body.starts_with("select(")) {
            errors.push(ValidationError::new(
                "NOT_SELECT",
                "Only a single SELECT statement is allowed",
            ));
        }

        for (keyword, pattern) in &self.deny_patterns {
            if pattern.is_match(body) {
                errors.push(ValidationError::new(
                    "FORBIDDEN_KEYWORD",
                    format!("Keyword '{}' is not allowed", keyword),
                ));
            }
        }

        if body.contains(';') {
            errors.push(ValidationError::new(
                "MULTIPLE_STATEMENTS",
                "Statement separators are not allowed",
            ));
        }

        if body.contains("--") || body.contains("/*") || body.contains("*/") {
            errors.push(ValidationError::new("COMMENTS_NOT_ALLOWED", "SQL comments are not allowed"));
        }

        let tautology = TAUTOLOGY_PATTERN
            .captures_iter(body)
            .any(|caps| caps[1] == caps[2])
            || OR_TRUE_PATTERN.is_match(body);
        if tautology {
            errors.push(ValidationError::new(
                "TAUTOLOGY",
                "Always-true OR conditions are not allowed",
            ));
        }

        errors
    }

    /// Every accepted scope-filter spelling for `scope`, lowercase
    pub fn enumerate_filters(&self, scope: &CallerScope) -> Vec<String> {
        let ids: Vec<String> = scope.ids().iter().map(|id| id.to_string()).collect();
        if ids.is_empty() {
            return Vec::new();
        }
        let compact = ids.join(",");
        let spaced = ids.join(", ");
        let lists = if compact == spaced {
            vec![compact]
        } else {
            vec![compact, spaced]
        };
        let table = self.policy.subquery_table.to_lowercase();

        let mut patterns: Vec<String> = Vec::new();
        let mut push = |p: String| {
            if !patterns.contains(&p) {
                patterns.push(p);
            }
        };

        for column in &self.policy.columns {
            let column = column.to_lowercase();

            for qualifier in &self.policy.qualifiers {
                let qualified = format!("{}{}", qualifier.to_lowercase(), column);
                for list in &lists {
                    push(format!("{} in ({})", qualified, list));
                    push(format!("{} in({})", qualified, list));
                    push(format!("{} in ( {} )", qualified, list));
                }
                for id in &ids {
                    push(format!("{} = {}", qualified, id));
                    push(format!("{}={}", qualified, id));
                    push(format!("{} in ({})", qualified, id));
                    push(format!("{} in ( {} )", qualified, id));
                }
            }

            let subqueries = [
                format!("{} in (select id from {} where", table, table),
                format!("exists (select 1 from {} where", table),
                format!("exists(select 1 from {} where", table),
            ];
            for prefix in &subqueries {
                for id in &ids {
                    push(format!("{} {} = {}", prefix, column, id));
                    push(format!("{} {}={}", prefix, column, id));
                }
                for list in &lists {
                    push(format!("{} {} in ({})", prefix, column, list));
                    push(format!("{} {} in({})", prefix, column, list));
                    push(format!("{} {} in ( {} )", prefix, column, list));
                }
            }
        }
        patterns
    }

    fn reject(
        &self,
        stage: ValidationStage,
        errors: Vec<ValidationError>,
        mut trace: Vec<ValidationState>,
        sql: &str,
        scope: &CallerScope,
    ) -> ScopeVerdict {
        trace.push(ValidationState::Rejected);
        let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
        warn!(
            target: "security",
            ?stage,
            ?codes,
            scope = %scope.joined(),
            sql = %sql,
            "Query rejected by access scope validation"
        );
        ScopeVerdict {
            state: ValidationState::Rejected,
            rejected_at: Some(stage),
            errors,
            matched_filter: None,
            trace,
        }
    }
}

/// Lowercase with whitespace runs collapsed to single spaces
pub fn normalize_sql(sql: &str) -> String {
    WHITESPACE_RUN
        .replace_all(&sql.to_lowercase(), " ")
        .trim()
        .to_string()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Substring match that refuses to start inside an identifier or qualified
/// name, and refuses to end inside a longer identifier or number.
fn contains_bounded(haystack: &str, pattern: &str) -> bool {
    let starts_word = pattern.chars().next().map_or(false, is_word_char);
    let ends_word = pattern.chars().next_back().map_or(false, is_word_char);

    haystack.match_indices(pattern).any(|(idx, _)| {
        let before_ok = !starts_word
            || haystack[..idx]
                .chars()
                .next_back()
                .map_or(true, |c| !is_word_char(c) && c != '.');
        let after_ok = !ends_word
            || haystack[idx + pattern.len()..]
                .chars()
                .next()
                .map_or(true, |c| !is_word_char(c));
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ScopeValidator {
        ScopeValidator::new(ScopePolicy::default()).unwrap()
    }

    #[test]
    fn test_single_id_filters_approved() {
        let v = validator();
        let scope = CallerScope::new(vec![101]);
        for sql in [
            "SELECT * FROM note n JOIN eleve e ON e.id = n.eleve WHERE e.IdPersonne = 101",
            "SELECT * FROM eleve WHERE IdPersonne IN (101)",
            "SELECT * FROM eleve WHERE IdPersonne IN ( 101 )",
            "select * from eleve where idpersonne=101;",
            "SELECT n.note FROM note n WHERE n.eleve IN (SELECT id FROM eleve WHERE IdPersonne = 101)",
            "SELECT a.* FROM absence a WHERE EXISTS (SELECT 1 FROM eleve WHERE IdPersonne=101 AND id = a.eleve)",
        ] {
            let verdict = v.validate(sql, &scope);
            assert!(verdict.is_approved(), "{} -> {}", sql, verdict.reason());
            assert_eq!(
                verdict.trace,
                vec![
                    ValidationState::Unchecked,
                    ValidationState::StructureChecked,
                    ValidationState::ScopeChecked,
                    ValidationState::Approved
                ]
            );
        }
    }

    #[test]
    fn test_foreign_id_rejected_at_scope() {
        let v = validator();
        let scope = CallerScope::new(vec![101]);
        let verdict = v.validate("SELECT * FROM eleve e WHERE e.IdPersonne = 999", &scope);
        assert!(!verdict.is_approved());
        assert_eq!(verdict.rejected_at, Some(ValidationStage::Scope));
        assert_eq!(verdict.primary_error().unwrap().code, "MISSING_SCOPE_FILTER");
    }

    #[test]
    fn test_token_boundaries() {
        let v = validator();
        let scope = CallerScope::new(vec![101]);
        for sql in [
            "SELECT * FROM eleve WHERE IdPersonne = 1010",
            "SELECT * FROM eleve WHERE xIdPersonne = 101",
            "SELECT * FROM eleve WHERE p.IdPersonne = 101",
            "SELECT * FROM eleve WHERE IdPersonne IN (1010)",
            "SELECT * FROM eleve WHERE IdPersonne IN ( 1010 )",
        ] {
            assert!(!v.validate(sql, &scope).is_approved(), "{}", sql);
        }
    }

    #[test]
    fn test_multi_id_scope() {
        let v = validator();
        let scope = CallerScope::new(vec![101, 102]);
        for sql in [
            "SELECT * FROM eleve WHERE IdPersonne IN (101,102)",
            "SELECT * FROM eleve e WHERE e.IdPersonne IN (101, 102)",
            "SELECT * FROM eleve WHERE eleve.idpersonne in(101,102)",
            "SELECT * FROM eleve e WHERE e.IdPersonne IN (  101,  102  )",
            "SELECT * FROM eleve WHERE IdPersonne = 102",
            "SELECT * FROM note WHERE eleve IN (SELECT id FROM eleve WHERE IdPersonne IN (101, 102))",
        ] {
            assert!(v.validate(sql, &scope).is_approved(), "{}", sql);
        }
        // A list naming an extra id is not a recognized spelling
        assert!(!v
            .validate("SELECT * FROM eleve WHERE IdPersonne IN (101,102,103)", &scope)
            .is_approved());
    }

    #[test]
    fn test_structure_rejections_beat_valid_scope() {
        let v = validator();
        let scope = CallerScope::new(vec![101]);
        let cases = [
            ("DROP TABLE eleve; SELECT * FROM eleve WHERE IdPersonne = 101", "NOT_SELECT"),
            ("SELECT * FROM eleve WHERE IdPersonne = 101; DELETE FROM note", "FORBIDDEN_KEYWORD"),
            ("SELECT * FROM eleve WHERE IdPersonne = 101 -- bypass", "COMMENTS_NOT_ALLOWED"),
            ("SELECT * FROM eleve WHERE IdPersonne = 101 /* x */", "COMMENTS_NOT_ALLOWED"),
            ("SELECT * FROM eleve WHERE IdPersonne = 101 OR 1=1", "TAUTOLOGY"),
            ("SELECT * FROM eleve WHERE IdPersonne = 101 OR 'a' = 'a'", "TAUTOLOGY"),
            (
                "SELECT nom FROM eleve WHERE IdPersonne = 101 UNION SELECT password FROM utilisateur",
                "FORBIDDEN_KEYWORD",
            ),
            ("SELECT * FROM eleve WHERE IdPersonne = 101; SELECT 1", "MULTIPLE_STATEMENTS"),
        ];
        for (sql, code) in cases {
            let verdict = v.validate(sql, &scope);
            assert_eq!(verdict.rejected_at, Some(ValidationStage::Structure), "{}", sql);
            assert!(
                verdict.errors.iter().any(|e| e.code == code),
                "{} -> {:?}",
                sql,
                verdict.errors
            );
            assert_eq!(verdict.trace.last(), Some(&ValidationState::Rejected));
        }
    }

    #[test]
    fn test_keywords_inside_identifiers_are_allowed() {
        let v = validator();
        let scope = CallerScope::new(vec![101]);
        let sql = "SELECT e.date_update, e.created_at FROM eleve e WHERE e.IdPersonne = 101";
        assert!(v.validate(sql, &scope).is_approved());
    }

    #[test]
    fn test_empty_scope_denies_all() {
        let v = validator();
        let verdict = v.validate("SELECT * FROM eleve WHERE IdPersonne = 101", &CallerScope::unrestricted());
        assert_eq!(verdict.rejected_at, Some(ValidationStage::Scope));
        assert_eq!(verdict.primary_error().unwrap().code, "EMPTY_SCOPE");
    }

    #[test]
    fn test_spelling_variants_fuzz() {
        let v = validator();
        let scope = CallerScope::new(vec![101]);
        let qualifiers = ["", "e.", "eleve.", "E.", "Eleve."];
        let columns = ["IdPersonne", "idpersonne", "ID_PERSONNE"];
        let filters = ["= {}", "={}", " =  {}", "IN ({})", "in({})", "IN  ( {} )"];

        for q in qualifiers {
            for c in columns {
                for f in filters {
                    let good = format!("SELECT * FROM eleve e WHERE {}{} {}", q, c, f.replace("{}", "101"));
                    let bad = format!("SELECT * FROM eleve e WHERE {}{} {}", q, c, f.replace("{}", "999"));
                    let spaced_list = f.contains("( {} )");
                    if !spaced_list {
                        assert!(v.validate(&good, &scope).is_approved(), "{}", good);
                    }
                    assert!(!v.validate(&bad, &scope).is_approved(), "{}", bad);
                    let unfiltered = format!("SELECT * FROM eleve e WHERE e.nom = '{}{}'", q, c);
                    assert!(!v.validate(&unfiltered, &scope).is_approved(), "{}", unfiltered);
                }
            }
        }
    }

    #[test]
    fn test_policy_from_json_defaults() {
        let policy: ScopePolicy = serde_json::from_str(r#"{"qualifiers": ["", "el."]}"#).unwrap();
        assert_eq!(policy.subquery_table, "eleve");
        assert_eq!(policy.columns, default_columns());

        let v = ScopeValidator::new(policy).unwrap();
        let scope = CallerScope::new(vec![7]);
        assert!(v.validate("SELECT * FROM eleve el WHERE el.IdPersonne = 7", &scope).is_approved());
        assert!(!v.validate("SELECT * FROM eleve e WHERE e.IdPersonne = 7", &scope).is_approved());
    }
}
