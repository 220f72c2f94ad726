use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<think>[\s\S]*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<reasoning>[\s\S]*?</reasoning>").unwrap());

static SQL_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:sql|mysql)?\s*(.*?)```").unwrap());

static STRAY_FENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:sql|mysql)?").unwrap());

/// Cleans an LLM translation down to the bare SQL statement
pub fn clean_sql_response(response: &str) -> String {
    let mut cleaned = THINK_TAG_PATTERN.replace_all(response, "").to_string();
    cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "").to_string();

    // Prefer the first fenced block when the model wrapped its answer
    if let Some(caps) = SQL_FENCE_PATTERN.captures(&cleaned) {
        cleaned = caps[1].to_string();
    }
    cleaned = STRAY_FENCE_PATTERN.replace_all(&cleaned, "").to_string();

    let trimmed = cleaned.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_think_tags() {
        let input = "<think>Some reasoning here</think>SELECT * FROM eleve";
        assert_eq!(clean_sql_response(input), "SELECT * FROM eleve");
    }

    #[test]
    fn test_clean_self_closing_think() {
        assert_eq!(clean_sql_response("<think/> SELECT 1;"), "SELECT 1");
    }

    #[test]
    fn test_clean_fenced_block() {
        let input = "Voici la requête :\n```sql\nSELECT * FROM classe;\n```\nBonne journée";
        assert_eq!(clean_sql_response(input), "SELECT * FROM classe");
    }

    #[test]
    fn test_clean_unterminated_fence() {
        assert_eq!(clean_sql_response("```sql\nSELECT id FROM eleve"), "SELECT id FROM eleve");
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(clean_sql_response("  <think>nothing</think>  "), "");
    }
}
