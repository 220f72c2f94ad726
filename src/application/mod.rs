pub mod use_cases;

pub use use_cases::scope_validator::{ScopePolicy, ScopeValidator, ScopeVerdict};
pub use use_cases::sql_assistant::{AnswerSource, AssistantResponse, Outcome, QueryFailure, SqlAssistant};
pub use use_cases::template_cache::{CacheHit, CacheHitKind, TemplateCacheStore};
