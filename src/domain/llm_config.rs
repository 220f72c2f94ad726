use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum LLMProvider {
    Local,
    OpenAI,
    OpenRouter,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,

    /// SQL dialect named in the system prompt; must match the school database
    #[serde(default = "default_dialect")]
    pub dialect: String,
}

fn default_dialect() -> String {
    "MySQL".to_string()
}

impl LLMConfig {
    /// System message sent with every translation request
    pub fn system_prompt(&self) -> String {
        format!(
            "You translate questions about a school database into a single {} SELECT query.",
            self.dialect
        )
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Local,
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            api_key: None,
            max_tokens: Some(500),
            // SQL generation wants near-deterministic output
            temperature: Some(0.0),
            dialect: default_dialect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_defaults_when_absent() {
        let config: LLMConfig = serde_json::from_str(
            r#"{"provider": "Local", "base_url": "http://localhost:1234/v1", "model": "m",
                "api_key": null, "max_tokens": 500, "temperature": 0.0}"#,
        )
        .unwrap();
        assert_eq!(config.dialect, "MySQL");
        assert!(config.system_prompt().contains("single MySQL SELECT query"));

        let sqlite = LLMConfig {
            dialect: "SQLite".to_string(),
            ..LLMConfig::default()
        };
        assert!(sqlite.system_prompt().contains("single SQLite SELECT query"));
    }
}
