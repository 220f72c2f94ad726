//! Fuzzy matching of normalized question templates
//!
//! Two interchangeable backends:
//! - TF-IDF cosine over sparse term vectors (feature `tfidf`)
//! - Jaccard overlap of word sets
//!
//! Scores are not comparable across backends, each carries its own default threshold.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[cfg(feature = "tfidf")]
use std::collections::HashMap;

pub const TFIDF_DEFAULT_THRESHOLD: f32 = 0.85;
pub const JACCARD_DEFAULT_THRESHOLD: f32 = 0.8;

/// Word tokens of two or more characters, placeholders included as words
static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

/// Similarity backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBackend {
    TfIdf,
    Jaccard,
}

impl Default for SimilarityBackend {
    fn default() -> Self {
        SimilarityBackend::TfIdf
    }
}

/// Fuzzy matcher over a corpus of normalized templates.
///
/// `fit` replaces the whole corpus. `best_match` returns the corpus index and
/// score of the best candidate at or above `threshold`; on ties the earliest
/// corpus entry wins.
pub trait SimilarityMatcher: Send + Sync {
    fn method(&self) -> &'static str;

    fn default_threshold(&self) -> f32;

    fn fit(&mut self, corpus: &[String]);

    fn best_match(&self, query: &str, threshold: f32) -> Option<(usize, f32)>;
}

/// Build the matcher for a backend. Without the `tfidf` feature the vector
/// backend falls back to Jaccard.
pub fn build_matcher(backend: SimilarityBackend) -> Box<dyn SimilarityMatcher> {
    match backend {
        #[cfg(feature = "tfidf")]
        SimilarityBackend::TfIdf => Box::new(TfIdfCosineMatcher::new()),
        #[cfg(not(feature = "tfidf"))]
        SimilarityBackend::TfIdf => {
            tracing::warn!("tfidf feature disabled, using jaccard similarity");
            Box::new(JaccardMatcher::new())
        }
        SimilarityBackend::Jaccard => Box::new(JaccardMatcher::new()),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    TOKEN_PATTERN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Pick the first index holding the maximum score, if it clears the threshold
fn select_best(scores: impl Iterator<Item = f32>, threshold: f32) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, score) in scores.enumerate() {
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((idx, score));
        }
    }
    best.filter(|(_, score)| *score >= threshold)
}

// ============================================================================
// TF-IDF cosine
// ============================================================================

/// Smoothed idf `ln((1 + n) / (1 + df)) + 1`, l2-normalized document vectors
#[cfg(feature = "tfidf")]
#[derive(Debug, Default)]
pub struct TfIdfCosineMatcher {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    documents: Vec<HashMap<usize, f32>>,
}

#[cfg(feature = "tfidf")]
impl TfIdfCosineMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn vectorize(&self, text: &str) -> HashMap<usize, f32> {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        for token in tokenize(text) {
            if let Some(&idx) = self.vocabulary.get(&token) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }
        for (idx, weight) in counts.iter_mut() {
            *weight *= self.idf[*idx];
        }
        let norm = counts.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for weight in counts.values_mut() {
                *weight /= norm;
            }
        }
        counts
    }
}

#[cfg(feature = "tfidf")]
impl SimilarityMatcher for TfIdfCosineMatcher {
    fn method(&self) -> &'static str {
        "tfidf_cosine"
    }

    fn default_threshold(&self) -> f32 {
        TFIDF_DEFAULT_THRESHOLD
    }

    fn fit(&mut self, corpus: &[String]) {
        self.vocabulary.clear();
        self.idf.clear();
        self.documents.clear();
        if corpus.is_empty() {
            return;
        }

        let tokenized: Vec<Vec<String>> = corpus.iter().map(|d| tokenize(d)).collect();
        let mut doc_freq: Vec<usize> = Vec::new();
        for tokens in &tokenized {
            let unique: HashSet<&String> = tokens.iter().collect();
            for token in unique {
                let next = self.vocabulary.len();
                let idx = *self.vocabulary.entry(token.clone()).or_insert(next);
                if idx == doc_freq.len() {
                    doc_freq.push(0);
                }
                doc_freq[idx] += 1;
            }
        }

        let n = corpus.len() as f32;
        self.idf = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
            .collect();
        self.documents = corpus.iter().map(|d| self.vectorize(d)).collect();
    }

    fn best_match(&self, query: &str, threshold: f32) -> Option<(usize, f32)> {
        if self.documents.is_empty() {
            return None;
        }
        let query_vec = self.vectorize(query);
        if query_vec.is_empty() {
            return None;
        }
        let scores = self.documents.iter().map(|doc| {
            query_vec
                .iter()
                .filter_map(|(idx, w)| doc.get(idx).map(|d| w * d))
                .sum::<f32>()
        });
        select_best(scores, threshold)
    }
}

// ============================================================================
// Jaccard
// ============================================================================

#[derive(Debug, Default)]
pub struct JaccardMatcher {
    documents: Vec<HashSet<String>>,
}

impl JaccardMatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Jaccard index of two word sets; two empty sets score 0
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

impl SimilarityMatcher for JaccardMatcher {
    fn method(&self) -> &'static str {
        "jaccard"
    }

    fn default_threshold(&self) -> f32 {
        JACCARD_DEFAULT_THRESHOLD
    }

    fn fit(&mut self, corpus: &[String]) {
        self.documents = corpus
            .iter()
            .map(|d| d.split_whitespace().map(|w| w.to_lowercase()).collect())
            .collect();
    }

    fn best_match(&self, query: &str, threshold: f32) -> Option<(usize, f32)> {
        let words: HashSet<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
        select_best(self.documents.iter().map(|doc| jaccard(&words, doc)), threshold)
    }
}
