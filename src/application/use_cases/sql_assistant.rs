//! SQL Assistant
//!
//! Answers one natural-language question for one caller:
//! - Restricted callers: resolve scope → restricted cache → materialize →
//!   validate → execute; on a miss the LLM translation is validated the same
//!   way and learned into the restricted cache.
//! - Unrestricted callers: cache → curated templates → LLM.
//!
//! A failing execution gets one correction round-trip when enabled.

use super::prompt_builder::PromptBuilder;
use super::scope_validator::{ScopeValidator, ScopeVerdict, ValidationError, ValidationStage};
use super::similarity_matcher::build_matcher;
use super::sql_materializer::{materialize, MaterializationIncomplete};
use super::template_cache::{CacheHitKind, TemplateCacheStore};
use super::template_matcher::{generate_query, TemplateMatcher};
use crate::domain::access::AccessLevel;
use crate::domain::error::Result;
use crate::domain::template::{placeholder_names, CallerScope};
use crate::infrastructure::config::AssistantConfig;
use crate::infrastructure::db::{
    QueryExecutor, QueryRows, ScopeResolver, SqliteConnectionProvider, SqlxExecutor,
};
use crate::infrastructure::llm_clients::{OpenAiCompatibleTranslator, SqlTranslator};
use crate::infrastructure::response::clean_sql_response;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where the executed SQL came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    CacheExact,
    CacheSimilar,
    CuratedTemplate,
    Llm,
    LlmCorrected,
}

impl From<CacheHitKind> for AnswerSource {
    fn from(kind: CacheHitKind) -> Self {
        match kind {
            CacheHitKind::Exact => AnswerSource::CacheExact,
            CacheHitKind::Similar => AnswerSource::CacheSimilar,
        }
    }
}

/// Why a question could not be answered
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryFailure {
    /// No supported role
    AccessDenied {
        provided: Vec<String>,
        required: Vec<String>,
    },
    /// Restricted caller with an empty scope
    NoAuthorizedRecords { caller_id: i64 },
    EmptyTranslation,
    TranslationFailed { message: String },
    MaterializationIncomplete {
        sql_template: String,
        unresolved: Vec<String>,
    },
    ScopeViolation {
        stage: Option<ValidationStage>,
        code: String,
        message: String,
    },
    ExecutionError { message: String },
}

impl QueryFailure {
    fn from_verdict(verdict: &ScopeVerdict) -> Self {
        Self::violation(verdict.rejected_at, verdict.primary_error(), verdict.reason())
    }

    fn violation(
        stage: Option<ValidationStage>,
        error: Option<&ValidationError>,
        fallback: String,
    ) -> Self {
        let (code, message) = match error {
            Some(e) => (e.code.clone(), e.message.clone()),
            None => ("REJECTED".to_string(), fallback),
        };
        QueryFailure::ScopeViolation {
            stage,
            code,
            message,
        }
    }
}

impl From<MaterializationIncomplete> for QueryFailure {
    fn from(incomplete: MaterializationIncomplete) -> Self {
        QueryFailure::MaterializationIncomplete {
            sql_template: incomplete.sql_template,
            unresolved: incomplete.unresolved,
        }
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryFailure::AccessDenied { provided, required } => write!(
                f,
                "Access denied: roles [{}] do not include one of [{}]",
                provided.join(", "),
                required.join(", ")
            ),
            QueryFailure::NoAuthorizedRecords { caller_id } => {
                write!(f, "No authorized records for caller {}", caller_id)
            }
            QueryFailure::EmptyTranslation => write!(f, "The translation produced no SQL"),
            QueryFailure::TranslationFailed { message } => {
                write!(f, "Translation failed: {}", message)
            }
            QueryFailure::MaterializationIncomplete {
                sql_template,
                unresolved,
            } => write!(
                f,
                "Unresolved placeholders [{}] in template: {}",
                unresolved.join(", "),
                sql_template
            ),
            QueryFailure::ScopeViolation { code, message, .. } => {
                write!(f, "Query refused ({}): {}", code, message)
            }
            QueryFailure::ExecutionError { message } => write!(f, "Execution failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answered { rows: QueryRows, source: AnswerSource },
    Failed(QueryFailure),
}

/// Final answer for one question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantResponse {
    /// SQL that was executed, or the last SQL considered before failing
    pub sql: Option<String>,
    pub outcome: Outcome,
}

impl AssistantResponse {
    fn answered(sql: String, rows: QueryRows, source: AnswerSource) -> Self {
        Self {
            sql: Some(sql),
            outcome: Outcome::Answered { rows, source },
        }
    }

    fn failed(sql: Option<String>, failure: QueryFailure) -> Self {
        Self {
            sql,
            outcome: Outcome::Failed(failure),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self.outcome, Outcome::Answered { .. })
    }

    pub fn rows(&self) -> Option<&QueryRows> {
        match &self.outcome {
            Outcome::Answered { rows, .. } => Some(rows),
            Outcome::Failed(_) => None,
        }
    }

    pub fn source(&self) -> Option<AnswerSource> {
        match &self.outcome {
            Outcome::Answered { source, .. } => Some(*source),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&QueryFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            Outcome::Answered { .. } => None,
        }
    }
}

pub struct SqlAssistant {
    translator: Arc<dyn SqlTranslator>,
    executor: Arc<dyn QueryExecutor>,
    scope_resolver: Arc<dyn ScopeResolver>,
    restricted_cache: TemplateCacheStore,
    unrestricted_cache: TemplateCacheStore,
    validator: ScopeValidator,
    curated: TemplateMatcher,
    prompts: PromptBuilder,
    correction_enabled: bool,
}

impl SqlAssistant {
    pub fn new(
        translator: Arc<dyn SqlTranslator>,
        executor: Arc<dyn QueryExecutor>,
        scope_resolver: Arc<dyn ScopeResolver>,
        restricted_cache: TemplateCacheStore,
        unrestricted_cache: TemplateCacheStore,
        validator: ScopeValidator,
    ) -> Self {
        Self {
            translator,
            executor,
            scope_resolver,
            restricted_cache,
            unrestricted_cache,
            validator,
            curated: TemplateMatcher::new(Vec::new()),
            prompts: PromptBuilder::new(None),
            correction_enabled: true,
        }
    }

    pub fn with_curated_templates(mut self, curated: TemplateMatcher) -> Self {
        self.curated = curated;
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_correction(mut self, enabled: bool) -> Self {
        self.correction_enabled = enabled;
        self
    }

    /// Build the local components from configuration around the given collaborators
    pub fn from_config(
        config: &AssistantConfig,
        translator: Arc<dyn SqlTranslator>,
        executor: Arc<dyn QueryExecutor>,
        scope_resolver: Arc<dyn ScopeResolver>,
    ) -> Result<Self> {
        let threshold = config.cache.threshold();
        let restricted_cache = TemplateCacheStore::open(
            config.cache.path_for(AccessLevel::Restricted),
            build_matcher(config.cache.backend),
        )?
        .with_threshold(threshold);
        let unrestricted_cache = TemplateCacheStore::open(
            config.cache.path_for(AccessLevel::Unrestricted),
            build_matcher(config.cache.backend),
        )?
        .with_threshold(threshold);

        let curated = match &config.assistant.curated_templates_path {
            Some(path) => TemplateMatcher::load(path)?,
            None => TemplateMatcher::new(Vec::new()),
        }
        .with_threshold(config.assistant.curated_threshold);

        info!(
            restricted_entries = restricted_cache.len(),
            unrestricted_entries = unrestricted_cache.len(),
            curated_templates = curated.len(),
            backend = ?config.cache.backend,
            "SQL assistant ready"
        );

        Ok(Self::new(
            translator,
            executor,
            scope_resolver,
            restricted_cache,
            unrestricted_cache,
            ScopeValidator::new(config.scope.clone())?,
        )
        .with_curated_templates(curated)
        .with_prompt_builder(PromptBuilder::new(Some(config.assistant.schema.clone())))
        .with_correction(config.assistant.correction_enabled))
    }

    /// Wire the bundled collaborators: chat-completions translator and SQLite executor
    pub async fn connect(config: &AssistantConfig) -> Result<Self> {
        let provider = Arc::new(
            SqliteConnectionProvider::connect(&config.database.url, config.database.max_connections)
                .await?,
        );
        let mut executor = SqlxExecutor::new(provider);
        if let Some(query) = &config.database.guardian_query {
            executor = executor.with_guardian_query(query.clone());
        }
        let executor = Arc::new(executor);
        let translator = Arc::new(OpenAiCompatibleTranslator::new(config.llm.clone()));

        Self::from_config(config, translator, executor.clone(), executor)
    }

    pub fn restricted_cache(&self) -> &TemplateCacheStore {
        &self.restricted_cache
    }

    pub fn unrestricted_cache(&self) -> &TemplateCacheStore {
        &self.unrestricted_cache
    }

    /// Answer `question` for `caller_id` holding `roles`
    pub async fn ask_question(&self, question: &str, caller_id: i64, roles: &[String]) -> AssistantResponse {
        let span = info_span!("ask_question", request_id = %Uuid::new_v4(), caller_id);
        self.answer(question.trim(), caller_id, roles)
            .instrument(span)
            .await
    }

    async fn answer(&self, question: &str, caller_id: i64, roles: &[String]) -> AssistantResponse {
        let Some(level) = AccessLevel::from_roles(roles) else {
            warn!(target: "security", caller_id, ?roles, "Access denied: no supported role");
            return AssistantResponse::failed(
                None,
                QueryFailure::AccessDenied {
                    provided: roles.to_vec(),
                    required: AccessLevel::supported_roles()
                        .iter()
                        .map(|r| r.to_string())
                        .collect(),
                },
            );
        };

        info!(%level, "Answering question");
        let response = match level {
            AccessLevel::Restricted => self.answer_restricted(question, caller_id).await,
            AccessLevel::Unrestricted => self.answer_unrestricted(question).await,
        };

        match &response.outcome {
            Outcome::Answered { rows, source } => {
                info!(?source, rows = rows.len(), "Question answered")
            }
            Outcome::Failed(failure) => warn!(%failure, "Question not answered"),
        }
        response
    }

    async fn answer_restricted(&self, question: &str, caller_id: i64) -> AssistantResponse {
        let scope = match self.scope_resolver.resolve_scope(caller_id).await {
            Ok(ids) => CallerScope::new(ids),
            Err(e) => {
                error!("Failed to resolve caller scope: {}", e);
                return AssistantResponse::failed(
                    None,
                    QueryFailure::ExecutionError {
                        message: e.to_string(),
                    },
                );
            }
        };
        if scope.is_empty() {
            return AssistantResponse::failed(None, QueryFailure::NoAuthorizedRecords { caller_id });
        }
        debug!(scope = %scope.joined(), "Caller scope resolved");

        if let Some(hit) = self.restricted_cache.lookup(question) {
            debug!(kind = ?hit.kind, score = hit.score, "Restricted cache hit");
            let sql = match materialize(&hit.sql_template, &hit.bindings, Some(&scope), question) {
                Ok(sql) => sql,
                Err(incomplete) => {
                    warn!("Cached template could not be materialized: {}", incomplete);
                    return AssistantResponse::failed(None, incomplete.into());
                }
            };
            if let Err(failure) = self.check(&sql, Some(&scope)) {
                return AssistantResponse::failed(Some(sql), failure);
            }
            return self
                .execute(question, sql, hit.kind.into(), Some(&scope), false)
                .await;
        }

        let prompt = self
            .prompts
            .build_restricted_prompt(question, caller_id, &scope);
        let sql = match self.translate(&prompt).await {
            Ok(sql) => sql,
            Err(failure) => return AssistantResponse::failed(None, failure),
        };
        if let Err(failure) = self.check(&sql, Some(&scope)) {
            return AssistantResponse::failed(Some(sql), failure);
        }
        self.execute(question, sql, AnswerSource::Llm, Some(&scope), true)
            .await
    }

    async fn answer_unrestricted(&self, question: &str) -> AssistantResponse {
        if let Some(hit) = self.unrestricted_cache.lookup(question) {
            debug!(kind = ?hit.kind, score = hit.score, "Cache hit");
            let sql = match materialize(&hit.sql_template, &hit.bindings, None, question) {
                Ok(sql) => sql,
                Err(incomplete) => {
                    warn!("Cached template could not be materialized: {}", incomplete);
                    return AssistantResponse::failed(None, incomplete.into());
                }
            };
            if let Err(failure) = self.check(&sql, None) {
                return AssistantResponse::failed(Some(sql), failure);
            }
            return self
                .execute(question, sql, hit.kind.into(), None, false)
                .await;
        }

        if let Some(curated) = self.curated.find_match(question) {
            let sql = generate_query(&curated.template, &curated.variables);
            let leftover = placeholder_names(&sql);
            if leftover.is_empty() {
                debug!(score = curated.score, reason = %curated.reason, "Curated template matched");
                if let Err(failure) = self.check(&sql, None) {
                    return AssistantResponse::failed(Some(sql), failure);
                }
                return self
                    .execute(question, sql, AnswerSource::CuratedTemplate, None, false)
                    .await;
            }
            debug!(?leftover, "Curated template left variables unbound, asking the LLM");
        }

        let prompt = self.prompts.build_unrestricted_prompt(question);
        let sql = match self.translate(&prompt).await {
            Ok(sql) => sql,
            Err(failure) => return AssistantResponse::failed(None, failure),
        };
        if let Err(failure) = self.check(&sql, None) {
            return AssistantResponse::failed(Some(sql), failure);
        }
        self.execute(question, sql, AnswerSource::Llm, None, true)
            .await
    }

    async fn translate(&self, prompt: &str) -> std::result::Result<String, QueryFailure> {
        let raw = self.translator.translate(prompt).await.map_err(|e| {
            error!("Translation failed: {}", e);
            QueryFailure::TranslationFailed {
                message: e.to_string(),
            }
        })?;

        let sql = clean_sql_response(&raw);
        if sql.is_empty() {
            warn!("Translator returned no SQL");
            return Err(QueryFailure::EmptyTranslation);
        }
        Ok(sql)
    }

    /// Full validation for a restricted scope, structure only otherwise
    fn check(&self, sql: &str, scope: Option<&CallerScope>) -> std::result::Result<(), QueryFailure> {
        match scope {
            Some(scope) => {
                let verdict = self.validator.validate(sql, scope);
                if verdict.is_approved() {
                    Ok(())
                } else {
                    Err(QueryFailure::from_verdict(&verdict))
                }
            }
            None => {
                let errors = self.validator.validate_structure(sql);
                match errors.first() {
                    None => Ok(()),
                    Some(first) => {
                        warn!(target: "security", code = %first.code, sql = %sql, "Query rejected by structure validation");
                        Err(QueryFailure::violation(
                            Some(ValidationStage::Structure),
                            Some(first),
                            String::new(),
                        ))
                    }
                }
            }
        }
    }

    async fn execute(
        &self,
        question: &str,
        sql: String,
        source: AnswerSource,
        scope: Option<&CallerScope>,
        learn: bool,
    ) -> AssistantResponse {
        match self.executor.run(&sql).await {
            Ok(rows) => {
                if learn {
                    self.learn(question, &sql, scope);
                }
                AssistantResponse::answered(sql, rows, source)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Query execution failed");
                if !self.correction_enabled {
                    return AssistantResponse::failed(Some(sql), QueryFailure::ExecutionError { message });
                }
                self.correct(question, sql, message, scope).await
            }
        }
    }

    /// One corrective round-trip; the repaired SQL goes through the same checks
    async fn correct(
        &self,
        question: &str,
        failed_sql: String,
        error: String,
        scope: Option<&CallerScope>,
    ) -> AssistantResponse {
        let prompt = self.prompts.build_correction_prompt(&failed_sql, &error);
        let repaired = match self.translator.translate(&prompt).await {
            Ok(raw) => clean_sql_response(&raw),
            Err(e) => {
                warn!("Correction request failed: {}", e);
                String::new()
            }
        };
        if repaired.is_empty() {
            return AssistantResponse::failed(Some(failed_sql), QueryFailure::ExecutionError { message: error });
        }
        if let Err(failure) = self.check(&repaired, scope) {
            return AssistantResponse::failed(Some(repaired), failure);
        }

        match self.executor.run(&repaired).await {
            Ok(rows) => {
                info!("Corrected query succeeded");
                self.learn(question, &repaired, scope);
                AssistantResponse::answered(repaired, rows, AnswerSource::LlmCorrected)
            }
            Err(e) => AssistantResponse::failed(
                Some(repaired),
                QueryFailure::ExecutionError {
                    message: e.to_string(),
                },
            ),
        }
    }

    /// Store a successful translation; failures are logged, never surfaced
    fn learn(&self, question: &str, sql: &str, scope: Option<&CallerScope>) {
        let stored = match scope {
            Some(scope) => self.restricted_cache.store_scoped(question, sql, scope),
            None => self.unrestricted_cache.store(question, sql),
        };
        match stored {
            Ok(key) => debug!(%key, "Template learned"),
            Err(e) => warn!("Failed to store template: {}", e),
        }
    }
}
