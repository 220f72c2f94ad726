//! Template domain types: placeholders, bindings, cache entries and caller scope.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved SQL placeholder standing for the live caller's authorized person ids.
pub const SCOPE_PLACEHOLDER: &str = "ScopeIds";

/// Value bound to `FamilyRelation`; it never carries an id.
pub const FAMILY_SENTINEL: &str = "caller_children";

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z][A-Za-z0-9_]*)\}").unwrap());

/// Named placeholders produced by parameter extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placeholder {
    FamilyRelation,
    TrimesterId,
    SurnameValue,
    GivenNameValue,
    ClassCode,
    SchoolYear,
    PersonId,
    Value,
}

impl Placeholder {
    pub const ALL: [Placeholder; 8] = [
        Placeholder::FamilyRelation,
        Placeholder::TrimesterId,
        Placeholder::SurnameValue,
        Placeholder::GivenNameValue,
        Placeholder::ClassCode,
        Placeholder::SchoolYear,
        Placeholder::PersonId,
        Placeholder::Value,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::FamilyRelation => "FamilyRelation",
            Placeholder::TrimesterId => "TrimesterId",
            Placeholder::SurnameValue => "SurnameValue",
            Placeholder::GivenNameValue => "GivenNameValue",
            Placeholder::ClassCode => "ClassCode",
            Placeholder::SchoolYear => "SchoolYear",
            Placeholder::PersonId => "PersonId",
            Placeholder::Value => "Value",
        }
    }

    /// `{Name}` marker as it appears inside templates
    pub fn marker(&self) -> String {
        format!("{{{}}}", self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }
}

/// Placeholder name → concrete value for one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keep only the bindings whose names occur as placeholders in `template`
    pub fn restricted_to(&self, template: &str) -> Bindings {
        let names = placeholder_names(template);
        Bindings(
            self.0
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, String)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Bindings(iter.into_iter().collect())
    }
}

/// Distinct placeholder names in order of first appearance
pub fn placeholder_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_PATTERN.captures_iter(text) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Byte ranges of every `{Name}` marker in `text`
pub(crate) fn placeholder_spans(text: &str) -> Vec<(usize, usize)> {
    PLACEHOLDER_PATTERN
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect()
}

/// Persisted question-template → SQL-template pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub question_template: String,
    pub sql_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_at: Option<DateTime<Utc>>,
}

/// Person ids the current caller may see. Empty for unrestricted callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerScope {
    person_ids: Vec<i64>,
}

impl CallerScope {
    /// Build a scope, dropping duplicates while keeping first-seen order
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut person_ids: Vec<i64> = Vec::new();
        for id in ids {
            if !person_ids.contains(&id) {
                person_ids.push(id);
            }
        }
        Self { person_ids }
    }

    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[i64] {
        &self.person_ids
    }

    pub fn is_empty(&self) -> bool {
        self.person_ids.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.person_ids.contains(&id)
    }

    /// Comma-joined ids as substituted for `{ScopeIds}`
    pub fn joined(&self) -> String {
        self.person_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
