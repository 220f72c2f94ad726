//! Assistant configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `EDUSQL_*` environment variables (`__` separates nested keys, e.g.
//! `EDUSQL_LLM__MODEL`). A `.env` file is read first when present.

use crate::application::use_cases::prompt_builder::SchemaContext;
use crate::application::use_cases::scope_validator::ScopePolicy;
use crate::application::use_cases::similarity_matcher::{
    SimilarityBackend, JACCARD_DEFAULT_THRESHOLD, TFIDF_DEFAULT_THRESHOLD,
};
use crate::application::use_cases::template_matcher::CURATED_DEFAULT_THRESHOLD;
use crate::domain::access::AccessLevel;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "EDUSQL_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    /// Scope filters accepted for parents
    #[serde(default)]
    pub scope: ScopePolicy,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub assistant: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Template cache for unrestricted callers
    pub unrestricted_path: PathBuf,

    /// Template cache for restricted callers
    pub restricted_path: PathBuf,

    /// Similarity backend: "tf_idf" or "jaccard"
    #[serde(default)]
    pub backend: SimilarityBackend,

    #[serde(default = "default_tfidf_threshold")]
    pub tfidf_threshold: f32,

    #[serde(default = "default_jaccard_threshold")]
    pub jaccard_threshold: f32,
}

fn default_tfidf_threshold() -> f32 {
    TFIDF_DEFAULT_THRESHOLD
}

fn default_jaccard_threshold() -> f32 {
    JACCARD_DEFAULT_THRESHOLD
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            unrestricted_path: PathBuf::from("data/cache_admin.json"),
            restricted_path: PathBuf::from("data/cache_parent.json"),
            backend: SimilarityBackend::default(),
            tfidf_threshold: default_tfidf_threshold(),
            jaccard_threshold: default_jaccard_threshold(),
        }
    }
}

impl CacheSettings {
    pub fn path_for(&self, level: AccessLevel) -> &Path {
        match level {
            AccessLevel::Unrestricted => &self.unrestricted_path,
            AccessLevel::Restricted => &self.restricted_path,
        }
    }

    /// Threshold of the configured backend
    pub fn threshold(&self) -> f32 {
        match self.backend {
            SimilarityBackend::TfIdf => self.tfidf_threshold,
            SimilarityBackend::Jaccard => self.jaccard_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Overrides the built-in guardian → children query
    #[serde(default)]
    pub guardian_query: Option<String>,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://data/school.db".to_string(),
            max_connections: default_max_connections(),
            guardian_query: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// One corrective LLM round-trip after an execution error
    #[serde(default = "default_true")]
    pub correction_enabled: bool,

    #[serde(default)]
    pub curated_templates_path: Option<PathBuf>,

    #[serde(default = "default_curated_threshold")]
    pub curated_threshold: f32,

    #[serde(default)]
    pub schema: SchemaContext,
}

fn default_true() -> bool {
    true
}

fn default_curated_threshold() -> f32 {
    CURATED_DEFAULT_THRESHOLD
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            correction_enabled: true,
            curated_templates_path: Some(PathBuf::from("data/templates_questions.json")),
            curated_threshold: default_curated_threshold(),
            schema: SchemaContext::default(),
        }
    }
}

/// Validation result for configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl AssistantConfig {
    /// Defaults, then `file` (if any), then the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut figment = Figment::from(Serialized::defaults(AssistantConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AssistantConfig = figment
            .extract()
            .map_err(|e| AppError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        let validation = config.validate();
        for warning in &validation.warnings {
            tracing::warn!("Config: {}", warning);
        }
        if !validation.valid {
            return Err(AppError::ConfigError(validation.errors.join("; ")));
        }
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (name, value) in [
            ("cache.tfidf_threshold", self.cache.tfidf_threshold),
            ("cache.jaccard_threshold", self.cache.jaccard_threshold),
            ("assistant.curated_threshold", self.assistant.curated_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{} must be between 0.0 and 1.0", name));
            }
        }
        if self.cache.threshold() < 0.5 {
            warnings.push("Similarity thresholds below 0.5 may reuse unrelated templates".to_string());
        }
        if self.cache.unrestricted_path == self.cache.restricted_path {
            errors.push("Restricted and unrestricted callers must not share a cache file".to_string());
        }

        if self.scope.columns.iter().all(|c| c.trim().is_empty()) {
            errors.push("scope.columns must name at least one person-id column".to_string());
        }
        if self.scope.qualifiers.is_empty() {
            errors.push("scope.qualifiers must not be empty".to_string());
        }

        if self.database.url.trim().is_empty() {
            errors.push("database.url is required".to_string());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be at least 1".to_string());
        }

        if self.llm.dialect.trim().is_empty() {
            errors.push("llm.dialect must name a SQL dialect".to_string());
        }
        if self.llm.provider != LLMProvider::Local && self.llm.api_key.is_none() {
            warnings.push(format!("No API key configured for {:?}", self.llm.provider));
        }

        ConfigValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}
