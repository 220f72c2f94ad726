//! SQL Template Materializer
//!
//! Rebinds live values into a cached SQL template. `{ScopeIds}` always comes
//! from the caller scope resolved for this request, never from cached text.

use super::parameter_extractor::find_parameter;
use crate::domain::template::{placeholder_names, Bindings, CallerScope, SCOPE_PLACEHOLDER};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Values allowed outside a quoted literal: one word, number, code or year
static BARE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\p{L}\p{N}_./-]+$").unwrap());

/// Placeholders left unresolved after materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializationIncomplete {
    pub sql_template: String,
    pub unresolved: Vec<String>,
}

impl fmt::Display for MaterializationIncomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unresolved placeholders [{}] in template: {}",
            self.unresolved.join(", "),
            self.sql_template
        )
    }
}

impl std::error::Error for MaterializationIncomplete {}

/// Produce executable SQL from a template.
///
/// Values come from `bindings` first, then from a fresh extraction of
/// `question`. Any placeholder still unresolved fails the whole call.
pub fn materialize(
    sql_template: &str,
    bindings: &Bindings,
    scope: Option<&CallerScope>,
    question: &str,
) -> std::result::Result<String, MaterializationIncomplete> {
    let mut sql = sql_template.to_string();
    let mut unresolved: Vec<String> = Vec::new();

    for name in placeholder_names(sql_template) {
        let value = if name == SCOPE_PLACEHOLDER {
            scope.filter(|s| !s.is_empty()).map(|s| s.joined())
        } else {
            bindings
                .get(&name)
                .map(|v| v.to_string())
                .or_else(|| find_parameter(&name, question))
        };

        match value.and_then(|v| substitute(&sql, &name, &v)) {
            Some(bound) => sql = bound,
            None => unresolved.push(name),
        }
    }

    if unresolved.is_empty() {
        Ok(sql)
    } else {
        Err(MaterializationIncomplete {
            sql_template: sql_template.to_string(),
            unresolved,
        })
    }
}

/// Replace every `{name}` marker with `value`.
///
/// Inside a quoted literal `'` is doubled; elsewhere only a single bare token
/// is accepted. Backslashes are never accepted. `None` means the value cannot
/// be bound safely.
fn substitute(sql: &str, name: &str, value: &str) -> Option<String> {
    let marker = format!("{{{}}}", name);
    if name == SCOPE_PLACEHOLDER {
        return Some(sql.replace(&marker, value));
    }
    if value.contains('\\') {
        warn!(placeholder = %name, "Refusing to bind a value containing a backslash");
        return None;
    }

    let mut out = String::with_capacity(sql.len() + value.len());
    let mut cursor = 0;
    for (idx, _) in sql.match_indices(&marker) {
        let end = idx + marker.len();
        let quoted = sql[..idx].ends_with('\'') && sql[end..].starts_with('\'');
        out.push_str(&sql[cursor..idx]);
        if quoted {
            out.push_str(&value.replace('\'', "''"));
        } else if BARE_TOKEN.is_match(value) {
            out.push_str(value);
        } else {
            warn!(placeholder = %name, "Refusing to bind a non-token value outside quotes");
            return None;
        }
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    Some(out)
}
