//! Template cache and scoped-access validation for natural-language queries
//! over a school-records database.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{AnswerSource, AssistantResponse, QueryFailure, SqlAssistant};
pub use domain::error::{AppError, Result};
pub use infrastructure::config::AssistantConfig;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber; `RUST_LOG` overrides the `info` default.
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
