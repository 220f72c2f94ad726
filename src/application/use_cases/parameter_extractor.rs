//! Parameter Extractor
//!
//! Detects structured values inside a natural-language question and swaps them
//! for named placeholders:
//! - Family-relation phrases ("mon enfant", "my daughter")
//! - Trimester references ("2ème trimestre", "trimestre 2")
//! - Uppercase surname + given name pairs
//! - Class codes ("7B2"), school years ("2023/2024"), short numeric ids
//! - Quoted literals
//!
//! Every recognizer lives in one ordered table. Classes run in table order and
//! a span replaced by an earlier class is never re-matched by a later one.

use crate::domain::template::{
    placeholder_spans, Bindings, CallerScope, Placeholder, FAMILY_SENTINEL, SCOPE_PLACEHOLDER,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;

/// Recognizer classes in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternClass {
    FamilyRelation,
    Trimester,
    UppercaseName,
    ClassCode,
    SchoolYear,
    NumericId,
    QuotedLiteral,
}

impl PatternClass {
    pub const PRECEDENCE: [PatternClass; 7] = [
        PatternClass::FamilyRelation,
        PatternClass::Trimester,
        PatternClass::UppercaseName,
        PatternClass::ClassCode,
        PatternClass::SchoolYear,
        PatternClass::NumericId,
        PatternClass::QuotedLiteral,
    ];
}

/// How a match turns into placeholder bindings
#[derive(Debug, Clone, Copy)]
enum ValueTransform {
    /// Fixed sentinel value, never the matched text
    Sentinel(&'static str),
    /// Lexical table entry
    Fixed(&'static str),
    /// `trimestre N` → 30 + N
    TrimesterNumber,
    /// Two captures → surname / given name
    SplitName,
    /// Whole match verbatim
    Verbatim,
    /// `YYYY<sep>YYYY` → `YYYY/YYYY`
    SchoolYear,
    /// Inner quoted value, named by the words before the quote
    QuotedProximity,
}

struct PatternRule {
    class: PatternClass,
    regex: Regex,
    placeholder: Placeholder,
    transform: ValueTransform,
}

impl PatternRule {
    fn new(
        class: PatternClass,
        pattern: &str,
        placeholder: Placeholder,
        transform: ValueTransform,
    ) -> Self {
        Self {
            class,
            regex: Regex::new(pattern).unwrap(),
            placeholder,
            transform,
        }
    }
}

static PATTERN_TABLE: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    use PatternClass as C;
    use ValueTransform as T;
    vec![
        PatternRule::new(
            C::FamilyRelation,
            r"(?i)\b(?:mon|ma|mes)\s+(?:enfants?|filles?|fils)\b|\bmy\s+(?:child(?:ren)?|kids?|sons?|daughters?)\b",
            Placeholder::FamilyRelation,
            T::Sentinel(FAMILY_SENTINEL),
        ),
        PatternRule::new(
            C::Trimester,
            r"(?i)\b(?:1er|1ère|1ere|1re|premier|première|premiere|first|1st)\s+(?:trimestre|trimester)\b",
            Placeholder::TrimesterId,
            T::Fixed("31"),
        ),
        PatternRule::new(
            C::Trimester,
            r"(?i)\b(?:2ème|2éme|2eme|2e|2nd|deuxième|deuxieme|second|seconde)\s+(?:trimestre|trimester)\b",
            Placeholder::TrimesterId,
            T::Fixed("32"),
        ),
        PatternRule::new(
            C::Trimester,
            r"(?i)\b(?:3ème|3éme|3eme|3e|3rd|troisième|troisieme|third)\s+(?:trimestre|trimester)\b",
            Placeholder::TrimesterId,
            T::Fixed("33"),
        ),
        PatternRule::new(
            C::Trimester,
            r"(?i)\b(?:trimestre|trimester)\s*([1-3])\b",
            Placeholder::TrimesterId,
            T::TrimesterNumber,
        ),
        PatternRule::new(
            C::UppercaseName,
            r"\b(\p{Lu}{3,})\s+(\p{Lu}{3,})\b",
            Placeholder::SurnameValue,
            T::SplitName,
        ),
        PatternRule::new(
            C::ClassCode,
            r"\b\d+[A-Z]\d+\b",
            Placeholder::ClassCode,
            T::Verbatim,
        ),
        PatternRule::new(
            C::SchoolYear,
            r"\b((?:19|20)\d{2})\s*[/-]\s*((?:19|20)\d{2})\b",
            Placeholder::SchoolYear,
            T::SchoolYear,
        ),
        PatternRule::new(
            C::NumericId,
            r"\b\d{1,5}\b",
            Placeholder::PersonId,
            T::Verbatim,
        ),
        PatternRule::new(
            C::QuotedLiteral,
            r#"(?:^|[\s(,=:])(?:'([^'\n]+)'|"([^"\n]+)")"#,
            Placeholder::Value,
            T::QuotedProximity,
        ),
    ]
});

static SCOPE_EQ_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:[a-z_][a-z0-9_]*\.)?)IdPersonne\s*=\s*(\d+)\b").unwrap()
});

static SCOPE_IN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:[a-z_][a-z0-9_]*\.)?)IdPersonne\s+IN\s*\(\s*(\d+(?:\s*,\s*\d+)*)\s*\)")
        .unwrap()
});

/// Trimester column compared to a trimester code
static TRIMESTER_FILTER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(codeperiexam\s*=\s*)3[1-3]\b").unwrap());

/// Words that mark a quoted literal as a surname
const NAME_HINTS: [&str; 2] = ["nom", "name"];
const NAME_HINT_WINDOW: usize = 24;

/// SQL words that are never turned into placeholders inside SQL text
const SQL_KEYWORDS: [&str; 14] = [
    "select", "from", "where", "join", "and", "or", "in", "on", "as", "group", "order", "by",
    "limit", "not",
];

/// Result of one extraction pass
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub bindings: Bindings,
}

/// One pending replacement inside the text
#[derive(Debug)]
struct Replacement {
    start: usize,
    end: usize,
    text: String,
    bindings: Vec<(Placeholder, String)>,
}

/// Replace every recognized parameter in `text` with its placeholder.
/// Never fails; text without any recognized value comes back unchanged.
pub fn extract_parameters(text: &str) -> Extraction {
    let mut current = text.to_string();
    let mut bindings = Bindings::new();

    for class in PatternClass::PRECEDENCE {
        let frozen: HashSet<String> = bindings.iter().map(|(k, _)| k.to_string()).collect();
        let spans = placeholder_spans(&current);

        let mut candidates: Vec<Replacement> = Vec::new();
        for rule in PATTERN_TABLE.iter().filter(|r| r.class == class) {
            for caps in rule.regex.captures_iter(&current) {
                if let Some(rep) = resolve_match(rule, &caps, &current, &bindings, &frozen) {
                    if !overlaps_any(rep.start, rep.end, &spans) {
                        candidates.push(rep);
                    }
                }
            }
        }

        // Earliest start wins an overlap, then the longer match
        candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        let mut accepted: Vec<Replacement> = Vec::new();
        for rep in candidates {
            if accepted.last().map_or(true, |prev| rep.start >= prev.end) {
                accepted.push(rep);
            }
        }

        // Right to left so earlier offsets stay valid
        for rep in accepted.iter().rev() {
            current.replace_range(rep.start..rep.end, &rep.text);
        }

        // Leftmost occurrence supplies the value within a class
        let mut bound_here: HashSet<Placeholder> = HashSet::new();
        for rep in &accepted {
            for (placeholder, value) in &rep.bindings {
                if frozen.contains(placeholder.name()) || !bound_here.insert(*placeholder) {
                    continue;
                }
                bindings.insert(placeholder.name(), value.clone());
            }
        }
    }

    Extraction {
        text: current,
        bindings,
    }
}

/// Best-effort lookup of a single parameter value directly in a question
pub fn find_parameter(name: &str, question: &str) -> Option<String> {
    extract_parameters(question)
        .bindings
        .get(name)
        .map(|v| v.to_string())
}

fn resolve_match(
    rule: &PatternRule,
    caps: &Captures,
    text: &str,
    bindings: &Bindings,
    frozen: &HashSet<String>,
) -> Option<Replacement> {
    let whole = caps.get(0)?;
    let marker = rule.placeholder.marker();

    match rule.transform {
        ValueTransform::Sentinel(value) | ValueTransform::Fixed(value) => Some(Replacement {
            start: whole.start(),
            end: whole.end(),
            text: marker,
            bindings: vec![(rule.placeholder, value.to_string())],
        }),
        ValueTransform::TrimesterNumber => {
            let n: u32 = caps.get(1)?.as_str().parse().ok()?;
            Some(Replacement {
                start: whole.start(),
                end: whole.end(),
                text: marker,
                bindings: vec![(rule.placeholder, (30 + n).to_string())],
            })
        }
        ValueTransform::SplitName => {
            let surname = caps.get(1)?.as_str().to_string();
            let given = caps.get(2)?.as_str().to_string();
            Some(Replacement {
                start: whole.start(),
                end: whole.end(),
                text: format!(
                    "{} {}",
                    Placeholder::SurnameValue.marker(),
                    Placeholder::GivenNameValue.marker()
                ),
                bindings: vec![
                    (Placeholder::SurnameValue, surname),
                    (Placeholder::GivenNameValue, given),
                ],
            })
        }
        ValueTransform::Verbatim => Some(Replacement {
            start: whole.start(),
            end: whole.end(),
            text: marker,
            bindings: vec![(rule.placeholder, whole.as_str().to_string())],
        }),
        ValueTransform::SchoolYear => {
            let value = format!("{}/{}", caps.get(1)?.as_str(), caps.get(2)?.as_str());
            Some(Replacement {
                start: whole.start(),
                end: whole.end(),
                text: marker,
                bindings: vec![(rule.placeholder, value)],
            })
        }
        ValueTransform::QuotedProximity => {
            let inner = caps.get(1).or_else(|| caps.get(2))?;
            let value = inner.as_str();

            // A letter right after the closing quote means an apostrophe, not a quote
            let after_close = text[inner.end()..].chars().nth(1);
            if after_close.map_or(false, |c| c.is_alphanumeric()) {
                return None;
            }
            if value.trim().is_empty() {
                return None;
            }
            // A value already bound by an earlier class reuses its placeholder
            if let Some((name, _)) = bindings.iter().find(|(_, v)| *v == value) {
                return Some(Replacement {
                    start: inner.start(),
                    end: inner.end(),
                    text: format!("{{{}}}", name),
                    bindings: Vec::new(),
                });
            }

            let placeholder = if has_name_hint(&text[..inner.start()])
                && !frozen.contains(Placeholder::SurnameValue.name())
            {
                Placeholder::SurnameValue
            } else if !frozen.contains(Placeholder::Value.name()) {
                Placeholder::Value
            } else {
                return None;
            };

            Some(Replacement {
                start: inner.start(),
                end: inner.end(),
                text: placeholder.marker(),
                bindings: vec![(placeholder, value.to_string())],
            })
        }
    }
}

fn has_name_hint(prefix: &str) -> bool {
    // Placeholder markers such as {SurnameValue} are not words of the question
    let mut plain = prefix.to_string();
    for (start, end) in placeholder_spans(prefix).into_iter().rev() {
        plain.replace_range(start..end, " ");
    }
    let window: String = plain
        .chars()
        .rev()
        .take(NAME_HINT_WINDOW)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<String>()
        .to_lowercase();
    NAME_HINTS.iter().any(|hint| window.contains(hint))
}

fn overlaps_any(start: usize, end: usize, spans: &[(usize, usize)]) -> bool {
    spans.iter().any(|&(s, e)| start < e && s < end)
}

/// Turn an executed SQL string into a SQL template.
///
/// Scope filters naming the caller's ids are rewritten first into the canonical
/// `IdPersonne IN ({ScopeIds})` form. Then token-bounded occurrences of the
/// binding values are replaced, longest value first. The family-relation
/// sentinel is skipped since it never appears as a literal.
pub fn template_sql(sql: &str, bindings: &Bindings, scope: &CallerScope) -> String {
    let mut templated = template_scope_filters(sql, scope);

    if bindings.contains(Placeholder::TrimesterId.name()) {
        let marker = Placeholder::TrimesterId.marker();
        templated = TRIMESTER_FILTER_PATTERN
            .replace_all(&templated, |caps: &Captures| format!("{}{}", &caps[1], marker))
            .into_owned();
    }

    let mut pairs: Vec<(&str, String)> = bindings
        .iter()
        .filter(|(name, _)| *name != Placeholder::FamilyRelation.name())
        .filter(|(_, value)| !value.trim().is_empty())
        .filter(|(_, value)| !SQL_KEYWORDS.contains(&value.to_lowercase().as_str()))
        .flat_map(|(name, value)| surface_forms(name, value).into_iter().map(move |v| (name, v)))
        .collect();
    pairs.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(b.0)));

    for (name, value) in pairs {
        templated = replace_token(&templated, &value, &format!("{{{}}}", name));
    }
    templated
}

/// Spellings a bound value may take inside SQL. School years are bound as
/// `YYYY/YYYY` but generated SQL often writes `YYYY-YYYY`.
fn surface_forms(name: &str, value: &str) -> Vec<String> {
    if name != Placeholder::SchoolYear.name() {
        return vec![value.to_string()];
    }
    match value.split_once('/') {
        Some((first, second)) => ["/", "-", " / ", " - "]
            .iter()
            .map(|sep| format!("{}{}{}", first, sep, second))
            .collect(),
        None => vec![value.to_string()],
    }
}

fn template_scope_filters(sql: &str, scope: &CallerScope) -> String {
    if scope.is_empty() {
        return sql.to_string();
    }
    let canonical = |qualifier: &str| format!("{}IdPersonne IN ({{{}}})", qualifier, SCOPE_PLACEHOLDER);

    let listed = SCOPE_IN_PATTERN.replace_all(sql, |caps: &Captures| {
        let ids: Vec<i64> = caps[2]
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect();
        if !ids.is_empty() && ids.iter().all(|id| scope.contains(*id)) {
            canonical(&caps[1])
        } else {
            caps[0].to_string()
        }
    });

    SCOPE_EQ_PATTERN
        .replace_all(&listed, |caps: &Captures| match caps[2].parse::<i64>() {
            Ok(id) if scope.contains(id) => canonical(&caps[1]),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn replace_token(text: &str, value: &str, replacement: &str) -> String {
    let numeric = value.chars().all(|c| c.is_ascii_digit());
    let spans = placeholder_spans(text);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for (idx, _) in text.match_indices(value) {
        if idx < cursor {
            continue;
        }
        let end = idx + value.len();
        let before = text[..idx].chars().next_back();
        let after = text[end..].chars().next();
        let bounded = |c: Option<char>| match c {
            None => true,
            Some(c) if c.is_alphanumeric() || c == '_' => false,
            // Digits glued to date or decimal separators belong to another literal
            Some(c) if numeric && matches!(c, '-' | '/' | '.' | ':') => false,
            Some(_) => true,
        };
        if !bounded(before) || !bounded(after) || overlaps_any(idx, end, &spans) {
            continue;
        }
        out.push_str(&text[cursor..idx]);
        out.push_str(replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimester_binding_is_stable() {
        let extraction = extract_parameters("bulletin de Jean Dupont pour le 2ème trimestre");
        assert_eq!(extraction.bindings.get("TrimesterId"), Some("32"));
        assert_eq!(extraction.text, "bulletin de Jean Dupont pour le {TrimesterId}");
        // Mixed-case names are not an uppercase pair
        assert!(!extraction.bindings.contains("SurnameValue"));
    }

    #[test]
    fn test_trimester_synonyms() {
        for question in ["premier trimestre", "trimestre 1", "1er trimestre", "1ère trimestre"] {
            let extraction = extract_parameters(question);
            assert_eq!(extraction.bindings.get("TrimesterId"), Some("31"), "{}", question);
            assert_eq!(extraction.text, "{TrimesterId}");
        }
        assert_eq!(
            extract_parameters("troisième trimestre").bindings.get("TrimesterId"),
            Some("33")
        );
    }

    #[test]
    fn test_family_relation_uses_sentinel() {
        let extraction = extract_parameters("Quelles sont les absences de mon fils ?");
        assert_eq!(extraction.text, "Quelles sont les absences de {FamilyRelation} ?");
        assert_eq!(extraction.bindings.get("FamilyRelation"), Some(FAMILY_SENTINEL));

        let english = extract_parameters("grades of my daughter");
        assert_eq!(english.text, "grades of {FamilyRelation}");
    }

    #[test]
    fn test_uppercase_name_pair() {
        let extraction = extract_parameters("adresse de DUPONT JEAN");
        assert_eq!(extraction.text, "adresse de {SurnameValue} {GivenNameValue}");
        assert_eq!(extraction.bindings.get("SurnameValue"), Some("DUPONT"));
        assert_eq!(extraction.bindings.get("GivenNameValue"), Some("JEAN"));
    }

    #[test]
    fn test_class_code_year_and_id() {
        let extraction = extract_parameters("emploi du temps de la classe 7B2 en 2023-2024 pour l'élève 1542");
        assert_eq!(
            extraction.text,
            "emploi du temps de la classe {ClassCode} en {SchoolYear} pour l'élève {PersonId}"
        );
        assert_eq!(extraction.bindings.get("ClassCode"), Some("7B2"));
        assert_eq!(extraction.bindings.get("SchoolYear"), Some("2023/2024"));
        assert_eq!(extraction.bindings.get("PersonId"), Some("1542"));
    }

    #[test]
    fn test_leftmost_value_wins_within_class() {
        let extraction = extract_parameters("comparer 2022/2023 et 2023/2024");
        assert_eq!(extraction.text, "comparer {SchoolYear} et {SchoolYear}");
        assert_eq!(extraction.bindings.get("SchoolYear"), Some("2022/2023"));
    }

    #[test]
    fn test_quoted_literals() {
        let named = extract_parameters("élèves dont le nom est 'BENALI'");
        assert_eq!(named.text, "élèves dont le nom est '{SurnameValue}'");
        assert_eq!(named.bindings.get("SurnameValue"), Some("BENALI"));

        let generic = extract_parameters("matière \"Physique\" cette année");
        assert_eq!(generic.text, "matière \"{Value}\" cette année");
        assert_eq!(generic.bindings.get("Value"), Some("Physique"));
    }

    #[test]
    fn test_quoted_value_already_bound_reuses_placeholder() {
        let extraction = extract_parameters("adresse de DUPONT JEAN 'DUPONT'");
        assert_eq!(
            extraction.text,
            "adresse de {SurnameValue} {GivenNameValue} '{SurnameValue}'"
        );
        assert_eq!(extraction.bindings.get("SurnameValue"), Some("DUPONT"));
        assert!(!extraction.bindings.contains("Value"));

        // Markers before the quote do not count as a "name" hint
        let generic = extract_parameters("classe de {GivenNameValue} \"Physique\"");
        assert_eq!(generic.text, "classe de {GivenNameValue} \"{Value}\"");
        assert_eq!(generic.bindings.get("Value"), Some("Physique"));
    }

    #[test]
    fn test_apostrophes_are_not_quotes() {
        let extraction = extract_parameters("les notes de l'élève d'aujourd'hui");
        assert_eq!(extraction.text, "les notes de l'élève d'aujourd'hui");
        assert!(extraction.bindings.is_empty());
    }

    #[test]
    fn test_placeholders_are_not_rematched() {
        let first = extract_parameters("notes de 7B2 au trimestre 2");
        let second = extract_parameters(&first.text);
        assert_eq!(second.text, first.text);
        assert!(second.bindings.is_empty());
    }

    #[test]
    fn test_unmatched_text_is_unchanged() {
        let extraction = extract_parameters("combien d'enseignants ?");
        assert_eq!(extraction.text, "combien d'enseignants ?");
        assert!(extraction.bindings.is_empty());
        assert_eq!(extract_parameters("").text, "");
    }

    #[test]
    fn test_template_sql_replaces_bounded_literals() {
        let extraction = extract_parameters("notes de la classe 7B2 en 2023/2024 au 2ème trimestre");
        let sql = "SELECT n.note FROM note n JOIN classe c ON c.id = n.classe \
                   WHERE c.CODECLASSEFR = '7B2' AND a.AnneeScolaire = '2023/2024' \
                   AND n.codeperiexam = 32 AND n.coef = 320";
        let templated = template_sql(sql, &extraction.bindings, &CallerScope::unrestricted());
        assert!(templated.contains("c.CODECLASSEFR = '{ClassCode}'"));
        assert!(templated.contains("a.AnneeScolaire = '{SchoolYear}'"));
        assert!(templated.contains("n.codeperiexam = {TrimesterId}"));
        assert!(templated.contains("n.coef = 320"));
    }

    #[test]
    fn test_template_sql_school_year_spellings() {
        let extraction = extract_parameters("moyenne de la classe 7B2 en 2023-2024 au trimestre 1");
        assert_eq!(extraction.bindings.get("SchoolYear"), Some("2023/2024"));

        for year in ["2023-2024", "2023 - 2024", "2023/2024", "2023 / 2024"] {
            let sql = format!(
                "SELECT AVG(n.note) FROM note n WHERE n.annee = '{}' AND n.codeperiexam = 31",
                year
            );
            assert_eq!(
                template_sql(&sql, &extraction.bindings, &CallerScope::unrestricted()),
                "SELECT AVG(n.note) FROM note n WHERE n.annee = '{SchoolYear}' \
                 AND n.codeperiexam = {TrimesterId}",
                "{}",
                year
            );
        }
    }

    #[test]
    fn test_template_sql_trimester_column() {
        let mut bindings = Bindings::new();
        bindings.insert("TrimesterId", "32");
        // The generated filter names another trimester; the column still becomes a placeholder
        let templated = template_sql(
            "SELECT * FROM note WHERE CodePeriExam=33 AND coef = 33",
            &bindings,
            &CallerScope::unrestricted(),
        );
        assert_eq!(templated, "SELECT * FROM note WHERE CodePeriExam={TrimesterId} AND coef = 33");

        let untouched = template_sql(
            "SELECT * FROM note WHERE codeperiexam = 32",
            &Bindings::new(),
            &CallerScope::unrestricted(),
        );
        assert_eq!(untouched, "SELECT * FROM note WHERE codeperiexam = 32");
    }

    #[test]
    fn test_template_sql_skips_dates() {
        let mut bindings = Bindings::new();
        bindings.insert("TrimesterId", "31");
        let templated = template_sql(
            "SELECT * FROM absence WHERE jour < '2023-12-31' AND codeperiexam = 31",
            &bindings,
            &CallerScope::unrestricted(),
        );
        assert_eq!(
            templated,
            "SELECT * FROM absence WHERE jour < '2023-12-31' AND codeperiexam = {TrimesterId}"
        );
    }

    #[test]
    fn test_template_sql_scope_filters() {
        let extraction = extract_parameters("absences de mon enfant au trimestre 2");
        let scope = CallerScope::new(vec![101, 102]);
        let sql = "SELECT a.* FROM absence a JOIN eleve e ON e.id = a.eleve \
                   WHERE e.IdPersonne IN (101, 102) AND a.codeperiexam = 32";
        assert_eq!(
            template_sql(sql, &extraction.bindings, &scope),
            "SELECT a.* FROM absence a JOIN eleve e ON e.id = a.eleve \
                   WHERE e.IdPersonne IN ({ScopeIds}) AND a.codeperiexam = {TrimesterId}"
        );

        // Ids outside the scope are left as literals
        let foreign = template_sql("SELECT * FROM eleve WHERE IdPersonne=1010", &Bindings::new(), &scope);
        assert_eq!(foreign, "SELECT * FROM eleve WHERE IdPersonne=1010");

        let single = template_sql("SELECT * FROM eleve WHERE IdPersonne=101", &Bindings::new(), &scope);
        assert_eq!(single, "SELECT * FROM eleve WHERE IdPersonne IN ({ScopeIds})");
    }

    #[test]
    fn test_find_parameter() {
        assert_eq!(
            find_parameter("SchoolYear", "moyenne générale 2024-2025"),
            Some("2024/2025".to_string())
        );
        assert_eq!(find_parameter("ClassCode", "moyenne générale"), None);
    }
}
