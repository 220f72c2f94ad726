//! Template Cache Store
//!
//! Persists question-template → SQL-template pairs in a flat JSON file and
//! answers exact (hash) and fuzzy (similarity) lookups. The similarity index is
//! refit under the same write lock that persists the file, so readers always see
//! an index that agrees with the stored entries.

use super::parameter_extractor::{extract_parameters, template_sql};
use super::similarity_matcher::SimilarityMatcher;
use super::template_normalizer::{canonicalize, normalize, template_key};
use crate::domain::error::{AppError, Result};
use crate::domain::template::{placeholder_names, Bindings, CacheEntry, CallerScope, SCOPE_PLACEHOLDER};
use crate::infrastructure::storage::{load_json, write_json_atomic, JsonLoad};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

static DOUBLED_BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z][A-Za-z0-9_]*)\}\}").unwrap());

/// Which lookup path produced a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHitKind {
    Exact,
    Similar,
}

/// A cache hit ready for materialization
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub kind: CacheHitKind,
    pub question_template: String,
    pub sql_template: String,
    /// Values extracted from the live question
    pub bindings: Bindings,
    /// 1.0 for exact hits
    pub score: f32,
}

struct CacheState {
    entries: BTreeMap<String, CacheEntry>,
    /// Keys in the order the matcher corpus was fit
    keys: Vec<String>,
    matcher: Box<dyn SimilarityMatcher>,
}

impl CacheState {
    fn refit(&mut self) {
        self.keys = self.entries.keys().cloned().collect();
        let corpus: Vec<String> = self
            .entries
            .values()
            .map(|e| e.question_template.clone())
            .collect();
        self.matcher.fit(&corpus);
    }
}

pub struct TemplateCacheStore {
    path: PathBuf,
    threshold: f32,
    state: RwLock<CacheState>,
}

impl TemplateCacheStore {
    /// Open the store backed by `path`. A missing file yields an empty store;
    /// a corrupt one is moved aside and the store starts empty.
    pub fn open(path: impl AsRef<Path>, matcher: Box<dyn SimilarityMatcher>) -> Result<Self> {
        let threshold = matcher.default_threshold();
        let store = Self {
            path: path.as_ref().to_path_buf(),
            threshold,
            state: RwLock::new(CacheState {
                entries: BTreeMap::new(),
                keys: Vec::new(),
                matcher,
            }),
        };
        store.reload()?;
        Ok(store)
    }

    /// Override the matcher's default similarity threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read the backing file and refit the similarity index
    pub fn reload(&self) -> Result<()> {
        let mut entries = match load_json::<BTreeMap<String, CacheEntry>>(&self.path)? {
            JsonLoad::Missing => BTreeMap::new(),
            JsonLoad::Loaded(entries) => entries,
            JsonLoad::Quarantined { backup, reason } => {
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "Template cache unreadable, starting empty: {}",
                    reason
                );
                BTreeMap::new()
            }
        };

        let repaired = repair_placeholder_syntax(&mut entries);

        let mut state = self.write_state();
        state.entries = entries;
        if repaired > 0 {
            info!(path = %self.path.display(), repaired, "Normalized doubled placeholder braces");
            write_json_atomic(&self.path, &state.entries)?;
        }
        state.refit();
        info!(
            path = %self.path.display(),
            entries = state.entries.len(),
            method = state.matcher.method(),
            "Template cache loaded"
        );
        Ok(())
    }

    /// Hash lookup of the normalized question.
    /// Bindings are limited to the placeholders the stored SQL uses.
    pub fn lookup_exact(&self, question: &str) -> Option<(String, Bindings)> {
        let extraction = extract_parameters(question);
        let key = template_key(&canonicalize(&extraction.text));

        let state = self.read_state();
        let entry = state.entries.get(&key)?;
        debug!(key = %key, "Exact template cache hit");
        Some((
            entry.sql_template.clone(),
            extraction.bindings.restricted_to(&entry.sql_template),
        ))
    }

    /// Best fuzzy match at or above `threshold`
    pub fn lookup_similar(&self, question: &str, threshold: f32) -> Option<(String, f32)> {
        self.similar_entry(&normalize(question), threshold)
            .map(|(entry, score)| (entry.sql_template, score))
    }

    fn similar_entry(&self, normalized: &str, threshold: f32) -> Option<(CacheEntry, f32)> {
        let state = self.read_state();
        let (idx, score) = state.matcher.best_match(normalized, threshold)?;
        let key = state.keys.get(idx)?;
        let entry = state.entries.get(key)?;
        debug!(
            key = %key,
            score,
            method = state.matcher.method(),
            "Similar template cache hit"
        );
        Some((entry.clone(), score))
    }

    /// Exact lookup first, then similarity at the configured threshold
    pub fn lookup(&self, question: &str) -> Option<CacheHit> {
        let extraction = extract_parameters(question);
        let normalized = canonicalize(&extraction.text);
        let key = template_key(&normalized);

        if let Some(entry) = self.read_state().entries.get(&key) {
            return Some(CacheHit {
                kind: CacheHitKind::Exact,
                question_template: entry.question_template.clone(),
                sql_template: entry.sql_template.clone(),
                bindings: extraction.bindings.restricted_to(&entry.sql_template),
                score: 1.0,
            });
        }

        let (entry, score) = self.similar_entry(&normalized, self.threshold)?;
        Some(CacheHit {
            kind: CacheHitKind::Similar,
            bindings: extraction.bindings.restricted_to(&entry.sql_template),
            question_template: entry.question_template,
            sql_template: entry.sql_template,
            score,
        })
    }

    /// Store an unscoped question/SQL pair
    pub fn store(&self, question: &str, sql: &str) -> Result<String> {
        self.store_scoped(question, sql, &CallerScope::unrestricted())
    }

    /// Template both sides, insert under the question key, persist and refit.
    /// Returns the cache key.
    pub fn store_scoped(&self, question: &str, sql: &str, scope: &CallerScope) -> Result<String> {
        if sql.trim().is_empty() {
            return Err(AppError::CacheError("Refusing to cache empty SQL".to_string()));
        }
        let extraction = extract_parameters(question);
        let question_template = canonicalize(&extraction.text);
        if question_template.is_empty() {
            return Err(AppError::CacheError("Refusing to cache empty question".to_string()));
        }
        let sql_template = template_sql(sql.trim(), &extraction.bindings, scope);
        let key = template_key(&question_template);

        let orphans: Vec<String> = placeholder_names(&sql_template)
            .into_iter()
            .filter(|name| name != SCOPE_PLACEHOLDER && !extraction.bindings.contains(name))
            .collect();
        if !orphans.is_empty() {
            warn!(key = %key, ?orphans, "SQL template carries placeholders the question does not bind");
        }

        let entry = CacheEntry {
            question_template,
            sql_template,
            learned_at: Some(Utc::now()),
        };

        let file_lock = path_lock(&self.path);
        let _file_guard = file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.write_state();
        let snapshot = state.entries.clone();
        self.merge_from_disk(&mut state.entries);
        state.entries.insert(key.clone(), entry);
        if let Err(e) = write_json_atomic(&self.path, &state.entries) {
            // Keep memory in line with the file that is still on disk
            state.entries = snapshot;
            return Err(AppError::CacheError(format!(
                "Failed to persist template cache {}: {}",
                self.path.display(),
                e
            )));
        }
        state.refit();
        info!(key = %key, entries = state.entries.len(), "Stored query template");
        Ok(key)
    }

    /// Snapshot of the stored entries, key-ordered
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        self.read_state()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Entries written to the file by another store since our last load win
    /// over the in-memory copy.
    fn merge_from_disk(&self, entries: &mut BTreeMap<String, CacheEntry>) {
        match load_json::<BTreeMap<String, CacheEntry>>(&self.path) {
            Ok(JsonLoad::Loaded(mut disk)) => {
                repair_placeholder_syntax(&mut disk);
                let before = entries.len();
                entries.extend(disk);
                debug!(
                    path = %self.path.display(),
                    merged = entries.len() - before,
                    "Merged template cache file before write"
                );
            }
            Ok(JsonLoad::Missing) => {}
            Ok(JsonLoad::Quarantined { backup, reason }) => {
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "Template cache unreadable before write, keeping memory: {}",
                    reason
                );
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Could not re-read template cache: {}", e);
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One lock per cache file, shared by every store opened on it in this process
static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = PATH_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(path.to_path_buf()).or_default().clone()
}

/// `{{X}}` → `{X}` in both templates; returns how many entries changed
fn repair_placeholder_syntax(entries: &mut BTreeMap<String, CacheEntry>) -> usize {
    let mut repaired = 0;
    for entry in entries.values_mut() {
        let question = DOUBLED_BRACES.replace_all(&entry.question_template, "{$1}").to_string();
        let sql = DOUBLED_BRACES.replace_all(&entry.sql_template, "{$1}").to_string();
        if question != entry.question_template || sql != entry.sql_template {
            entry.question_template = question;
            entry.sql_template = sql;
            repaired += 1;
        }
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::similarity_matcher::{
        build_matcher, JaccardMatcher, SimilarityBackend,
    };
    use crate::application::use_cases::sql_materializer::materialize;
    use std::fs;

    fn temp_cache_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("edusql-cache-{}", uuid::Uuid::new_v4()))
            .join("cache.json")
    }

    fn open_store(path: &Path) -> TemplateCacheStore {
        TemplateCacheStore::open(path, Box::new(JaccardMatcher::new())).unwrap()
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_empty_store_never_matches() {
        let path = temp_cache_path();
        let store = open_store(&path);
        assert!(store.is_empty());
        assert!(store.lookup_exact("notes de 2023/2024").is_none());
        assert!(store.lookup_similar("notes de 2023/2024", 0.0).is_none());
        assert!(store.lookup("notes de 2023/2024").is_none());
    }

    #[test]
    fn test_school_year_variant_hits_exact() {
        let path = temp_cache_path();
        let store = open_store(&path);
        store
            .store(
                "Donne moi les notes de 2023/2024",
                "SELECT n.note FROM note n JOIN anneescolaire a ON a.id = n.annee WHERE a.AnneeScolaire = '2023/2024'",
            )
            .unwrap();

        let (sql, bindings) = store.lookup_exact("donne moi les notes de 2024-2025").unwrap();
        assert!(sql.contains("a.AnneeScolaire = '{SchoolYear}'"));
        assert_eq!(bindings.get("SchoolYear"), Some("2024/2025"));
        cleanup(&path);
    }

    #[test]
    fn test_trimester_synonyms_share_one_entry() {
        let path = temp_cache_path();
        let store = open_store(&path);
        let sql = "SELECT * FROM note WHERE codeperiexam = 31";
        store.store("moyennes du premier trimestre", sql).unwrap();
        store.store("moyennes du trimestre 1", sql).unwrap();
        store.store("moyennes du 1er trimestre", sql).unwrap();

        assert_eq!(store.len(), 1);
        let (template, bindings) = store.lookup_exact("moyennes du 1er trimestre").unwrap();
        assert_eq!(template, "SELECT * FROM note WHERE codeperiexam = {TrimesterId}");
        assert_eq!(bindings.get("TrimesterId"), Some("31"));
        cleanup(&path);
    }

    #[test]
    fn test_scoped_store_uses_scope_placeholder() {
        let path = temp_cache_path();
        let store = open_store(&path);
        let scope = CallerScope::new(vec![101]);
        store
            .store_scoped(
                "absences de mon enfant",
                "SELECT * FROM absence a JOIN eleve e ON e.id = a.eleve WHERE e.IdPersonne = 101",
                &scope,
            )
            .unwrap();

        let (template, bindings) = store.lookup_exact("absences de ma fille").unwrap();
        assert_eq!(
            template,
            "SELECT * FROM absence a JOIN eleve e ON e.id = a.eleve WHERE e.IdPersonne IN ({ScopeIds})"
        );
        // The family sentinel never reaches the SQL, so it is not returned
        assert!(bindings.is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_similar_lookup_reports_kind() {
        let path = temp_cache_path();
        let store = open_store(&path);
        store
            .store("donne moi les notes de 2023/2024", "SELECT * FROM note WHERE annee = '2023/2024'")
            .unwrap();

        let hit = store.lookup("donne moi toutes les notes de 2022/2023").unwrap();
        assert_eq!(hit.kind, CacheHitKind::Similar);
        assert_eq!(hit.bindings.get("SchoolYear"), Some("2022/2023"));
        assert!(hit.score >= store.threshold());

        let exact = store.lookup("Donne moi les   notes de 2021-2022").unwrap();
        assert_eq!(exact.kind, CacheHitKind::Exact);
        assert_eq!(exact.score, 1.0);
        cleanup(&path);
    }

    #[test]
    fn test_store_persists_and_reopens() {
        let path = temp_cache_path();
        {
            let store = open_store(&path);
            store.store("liste des enseignants", "SELECT * FROM enseignant").unwrap();
        }
        let reopened = TemplateCacheStore::open(&path, build_matcher(SimilarityBackend::default())).unwrap();
        assert_eq!(reopened.len(), 1);
        let (sql, _) = reopened.lookup_exact("Liste des   enseignants").unwrap();
        assert_eq!(sql, "SELECT * FROM enseignant");
        cleanup(&path);
    }

    #[test]
    fn test_reload_sees_external_changes() {
        let path = temp_cache_path();
        let store = open_store(&path);
        store.store("liste des classes", "SELECT * FROM classe").unwrap();

        let other = open_store(&path);
        other.store("liste des matières", "SELECT * FROM matiere").unwrap();

        assert!(store.lookup_exact("liste des matières").is_none());
        store.reload().unwrap();
        assert!(store.lookup_exact("liste des matières").is_some());
        assert_eq!(store.len(), 2);
        cleanup(&path);
    }

    #[test]
    fn test_stores_sharing_a_file_keep_each_others_entries() {
        let path = temp_cache_path();
        let first = open_store(&path);
        let second = open_store(&path);

        first.store("liste des classes", "SELECT * FROM classe").unwrap();
        second.store("liste des matières", "SELECT * FROM matiere").unwrap();
        assert_eq!(second.len(), 2);
        first.store("combien d'enseignants", "SELECT COUNT(*) FROM enseignant").unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.lookup_exact("liste des matières").is_some());

        let reopened = open_store(&path);
        assert_eq!(reopened.len(), 3);
        for question in ["liste des classes", "liste des matières", "combien d'enseignants"] {
            assert!(reopened.lookup_exact(question).is_some(), "{}", question);
        }
        cleanup(&path);
    }

    #[test]
    fn test_dashed_school_year_in_sql_is_templated() {
        let path = temp_cache_path();
        let store = open_store(&path);
        store
            .store("notes de 2023-2024", "SELECT * FROM note WHERE annee = '2023-2024'")
            .unwrap();

        let (template, bindings) = store.lookup_exact("notes de 2024-2025").unwrap();
        assert_eq!(template, "SELECT * FROM note WHERE annee = '{SchoolYear}'");
        let sql = materialize(&template, &bindings, None, "notes de 2024-2025").unwrap();
        assert_eq!(sql, "SELECT * FROM note WHERE annee = '2024/2025'");
        cleanup(&path);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let path = temp_cache_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[[[").unwrap();

        let store = open_store(&path);
        assert!(store.is_empty());
        assert!(path.with_file_name("cache.bak.json").exists());
        cleanup(&path);
    }

    #[test]
    fn test_doubled_braces_are_repaired_on_load() {
        let path = temp_cache_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let key = template_key("notes de {schoolyear}");
        let mut raw = serde_json::Map::new();
        raw.insert(
            key,
            serde_json::json!({
                "question_template": "notes de {{schoolyear}}",
                "sql_template": "SELECT * FROM note WHERE annee = '{{SchoolYear}}'"
            }),
        );
        fs::write(&path, serde_json::Value::Object(raw).to_string()).unwrap();

        let store = open_store(&path);
        let entries = store.entries();
        assert_eq!(entries[0].1.sql_template, "SELECT * FROM note WHERE annee = '{SchoolYear}'");
        assert_eq!(entries[0].1.question_template, "notes de {schoolyear}");

        let persisted = fs::read_to_string(&path).unwrap();
        assert!(!persisted.contains("{{"));
        cleanup(&path);
    }

    #[test]
    fn test_store_rejects_empty_sql() {
        let path = temp_cache_path();
        let store = open_store(&path);
        assert!(store.store("liste des classes", "   ").is_err());
        assert!(store.is_empty());
        cleanup(&path);
    }
}
