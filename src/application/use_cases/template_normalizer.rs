//! Template Normalizer
//!
//! Canonical question text used both for cache keys and similarity indexing.

use super::parameter_extractor::extract_parameters;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Extract parameters, collapse whitespace, lowercase and trim.
pub fn normalize(text: &str) -> String {
    let extraction = extract_parameters(text);
    canonicalize(&extraction.text)
}

/// Whitespace and case canonicalization of text that already carries placeholders
pub fn canonicalize(text: &str) -> String {
    WHITESPACE_RUN
        .replace_all(text, " ")
        .to_lowercase()
        .trim()
        .to_string()
}

/// Hex SHA-256 digest of an already normalized template
pub fn template_key(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Cache key for a raw question
pub fn cache_key(question: &str) -> String {
    template_key(&normalize(question))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_idempotent() {
        let questions = [
            "Donne moi les notes de la classe 7B2   en 2023/2024",
            "  Absences de MON FILS au 2ème trimestre ?",
            "élèves dont le nom est 'BENALI'",
            "combien d'enseignants",
            "adresse de DUPONT JEAN 'DUPONT'",
            "classe de {GivenNameValue} 'Physique'",
        ];
        for q in questions {
            let once = normalize(q);
            assert_eq!(normalize(&once), once, "{}", q);
        }
    }

    #[test]
    fn test_normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize("Notes   de la classe\t7B2 "),
            "notes de la classe {classcode}"
        );
    }

    #[test]
    fn test_trimester_synonyms_share_a_key() {
        let a = cache_key("notes du premier trimestre");
        let b = cache_key("notes du trimestre 1");
        let c = cache_key("notes du 1er trimestre");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_school_year_variants_share_a_key() {
        assert_eq!(
            cache_key("Donne moi les notes de 2023/2024"),
            cache_key("donne moi les notes de 2024-2025")
        );
    }
}
