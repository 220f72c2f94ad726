pub mod parameter_extractor;
pub mod prompt_builder;
pub mod scope_validator;
pub mod similarity_matcher;
pub mod sql_assistant;
pub mod sql_materializer;
pub mod template_cache;
pub mod template_matcher;
pub mod template_normalizer;
