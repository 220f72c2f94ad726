pub mod openai_compat;

use crate::domain::error::Result;
use async_trait::async_trait;

pub use openai_compat::OpenAiCompatibleTranslator;

/// Natural language → SQL translation collaborator.
/// An empty string means the model produced no usable SQL.
#[async_trait]
pub trait SqlTranslator: Send + Sync {
    async fn translate(&self, prompt: &str) -> Result<String>;
}
