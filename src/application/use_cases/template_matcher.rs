//! Template Matcher for curated questions
//!
//! Matches questions against a hand-written list of question templates:
//! - Exact match: every `{var}` in the template becomes a lazy named group
//! - Similar match: word-set overlap with the placeholders stripped
//!
//! A match carries the recovered variables, ready for `generate_query`.

use super::similarity_matcher::jaccard;
use crate::domain::error::Result;
use crate::infrastructure::storage::{load_json, JsonLoad};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

pub const CURATED_DEFAULT_THRESHOLD: f32 = 0.6;

static TEMPLATE_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]+?)\}").unwrap());
static VALID_GROUP_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static SCHOOL_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(20\d{2}[-/]20\d{2})").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Variable name the school-year scan binds
const SCHOOL_YEAR_VAR: &str = "AnneeScolaire";

/// One curated question with its SQL
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuestionTemplate {
    pub template_question: String,
    pub requete_template: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    questions: Vec<serde_json::Value>,
}

/// Match score for a template
#[derive(Debug, Clone)]
pub struct TemplateMatch {
    pub template: QuestionTemplate,
    pub variables: BTreeMap<String, String>,
    pub score: f32,  // 1.0 for exact matches
    pub reason: String,
}

struct CompiledTemplate {
    template: QuestionTemplate,
    pattern: Option<Regex>,
    words: HashSet<String>,
}

pub struct TemplateMatcher {
    templates: Vec<CompiledTemplate>,
    threshold: f32,
}

impl TemplateMatcher {
    pub fn new(templates: Vec<QuestionTemplate>) -> Self {
        let templates = templates
            .into_iter()
            .map(|template| CompiledTemplate {
                pattern: compile_pattern(&template.template_question),
                words: word_set(&strip_placeholders(&template.template_question)),
                template,
            })
            .collect();
        Self {
            templates,
            threshold: CURATED_DEFAULT_THRESHOLD,
        }
    }

    /// Load templates from `{"questions": [...]}`.
    /// Missing or empty files give an empty matcher; incomplete items are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match load_json::<TemplateFile>(path)? {
            JsonLoad::Missing => {
                info!(path = %path.display(), "No curated templates, LLM only");
                return Ok(Self::new(Vec::new()));
            }
            JsonLoad::Quarantined { backup, reason } => {
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "Curated templates unreadable: {}",
                    reason
                );
                return Ok(Self::new(Vec::new()));
            }
            JsonLoad::Loaded(file) => file,
        };

        let mut templates = Vec::new();
        for item in file.questions {
            match serde_json::from_value::<QuestionTemplate>(item.clone()) {
                Ok(t) => templates.push(t),
                Err(_) => {
                    let description = item
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("no description");
                    warn!("Skipping incomplete curated template: {}", description);
                }
            }
        }
        info!(count = templates.len(), "Curated templates loaded");
        Ok(Self::new(templates))
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get_templates(&self) -> Vec<&QuestionTemplate> {
        self.templates.iter().map(|c| &c.template).collect()
    }

    /// Exact match first, then the best similar template
    pub fn find_match(&self, question: &str) -> Option<TemplateMatch> {
        self.find_exact(question)
            .or_else(|| self.find_similar(question))
    }

    pub fn find_exact(&self, question: &str) -> Option<TemplateMatch> {
        let cleaned = trim_question(question);
        for compiled in &self.templates {
            let Some(pattern) = &compiled.pattern else {
                continue;
            };
            let Some(caps) = pattern.captures(cleaned) else {
                continue;
            };
            let variables = pattern
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().trim().to_string())))
                .collect();
            return Some(TemplateMatch {
                template: compiled.template.clone(),
                variables,
                score: 1.0,
                reason: "exact pattern match".to_string(),
            });
        }
        None
    }

    pub fn find_similar(&self, question: &str) -> Option<TemplateMatch> {
        let words = word_set(&strip_placeholders(question));
        if words.is_empty() {
            return None;
        }

        let mut best: Option<(&CompiledTemplate, f32)> = None;
        for compiled in &self.templates {
            let score = jaccard(&words, &compiled.words);
            if score >= self.threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((compiled, score));
            }
        }

        let (compiled, score) = best?;
        Some(TemplateMatch {
            template: compiled.template.clone(),
            variables: recover_variables(question, &compiled.template.template_question),
            score,
            reason: format!("word overlap: {:.2}", score),
        })
    }
}

/// Substitute cleaned variable values into the template SQL
pub fn generate_query(template: &QuestionTemplate, variables: &BTreeMap<String, String>) -> String {
    let mut sql = template.requete_template.clone();
    for (name, value) in variables {
        let mut clean = value
            .split('?')
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches(|c: char| ",.!?\"'".contains(c))
            .to_string();
        if name.eq_ignore_ascii_case(SCHOOL_YEAR_VAR) {
            clean = clean.replace('-', "/");
        }
        sql = sql.replace(&format!("{{{}}}", name), &clean);
    }
    sql
}

fn trim_question(question: &str) -> &str {
    question.trim().trim_end_matches(|c| c == ' ' || c == '?')
}

fn compile_pattern(template_question: &str) -> Option<Regex> {
    let text = trim_question(template_question);
    let mut pattern = String::from("(?i)^");
    let mut seen: HashSet<String> = HashSet::new();
    let mut cursor = 0;

    for caps in TEMPLATE_VAR.captures_iter(text) {
        let whole = caps.get(0)?;
        let name = caps[1].trim();
        pattern.push_str(&regex::escape(&text[cursor..whole.start()]));
        if VALID_GROUP_NAME.is_match(name) && seen.insert(name.to_string()) {
            pattern.push_str(&format!("(?P<{}>.+?)", name));
        } else {
            pattern.push_str("(?:.+?)");
        }
        cursor = whole.end();
    }
    pattern.push_str(&regex::escape(&text[cursor..]));
    pattern.push('$');

    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Curated template '{}' has no usable pattern: {}", template_question, e);
            None
        }
    }
}

fn strip_placeholders(text: &str) -> String {
    TEMPLATE_VAR.replace_all(text, "").to_string()
}

fn word_set(text: &str) -> HashSet<String> {
    WHITESPACE_RUN
        .replace_all(&text.to_lowercase(), " ")
        .split_whitespace()
        .map(|w| w.to_string())
        .collect()
}

/// Recover variables for a similar (not exact) match: a school-year scan, then
/// the token following the word that precedes each `{var}` in the template.
fn recover_variables(question: &str, template_question: &str) -> BTreeMap<String, String> {
    let mut variables = BTreeMap::new();

    if let Some(m) = SCHOOL_YEAR.find(question) {
        variables.insert(SCHOOL_YEAR_VAR.to_string(), m.as_str().replace('-', "/"));
    }

    for caps in TEMPLATE_VAR.captures_iter(template_question) {
        let name = caps[1].trim().to_string();
        if variables.contains_key(&name) {
            continue;
        }
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(keyword) = template_question[..whole.start()].split_whitespace().last() else {
            continue;
        };
        let Ok(re) = Regex::new(&format!(r"(?i){}\s+(\S+)", regex::escape(keyword))) else {
            continue;
        };
        if let Some(found) = re.captures(question) {
            let value = found[1].trim_matches(|c: char| ",.?!".contains(c)).to_string();
            variables.insert(name, value);
        }
    }
    variables
}
