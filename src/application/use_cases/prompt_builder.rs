//! Prompt Builder for SQL translation
//!
//! Three prompts: full-access translation, scope-restricted translation for
//! parents, and the one-shot correction of a failing query.

use crate::domain::template::CallerScope;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Schema description injected into translation prompts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaContext {
    /// Table and column listing
    #[serde(default)]
    pub table_info: String,
    /// Short descriptions of the functional domains (notes, absences, paiements…)
    #[serde(default)]
    pub domain_descriptions: Vec<String>,
    /// Foreign-key relations in plain text
    #[serde(default)]
    pub relations: String,
}

impl SchemaContext {
    pub fn is_empty(&self) -> bool {
        self.table_info.trim().is_empty()
            && self.domain_descriptions.is_empty()
            && self.relations.trim().is_empty()
    }
}

/// Prompt builder
pub struct PromptBuilder {
    schema: Option<SchemaContext>,
}

impl PromptBuilder {
    pub fn new(schema: Option<SchemaContext>) -> Self {
        Self {
            schema: schema.filter(|s| !s.is_empty()),
        }
    }

    /// Prompt for callers with full read access
    pub fn build_unrestricted_prompt(&self, question: &str) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "You are an expert SQL assistant for a school-records database."
        );
        let _ = writeln!(
            prompt,
            "Translate the question (usually in French) into one MySQL SELECT query."
        );
        let _ = writeln!(prompt, "ACCESS: administrator, all records are visible.\n");

        self.add_conventions(&mut prompt);
        self.add_schema(&mut prompt);
        Self::add_task(&mut prompt, question);
        prompt
    }

    /// Prompt for a parent limited to their own children
    pub fn build_restricted_prompt(&self, question: &str, caller_id: i64, scope: &CallerScope) -> String {
        let ids = scope.joined();
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "You are an expert SQL assistant for a school-records database."
        );
        let _ = writeln!(
            prompt,
            "Translate the question (usually in French) into one MySQL SELECT query."
        );
        let _ = writeln!(prompt, "ACCESS: parent, limited to their own children.\n");

        let _ = writeln!(prompt, "## Security restrictions");
        let _ = writeln!(prompt, "- Only students with person ids {} may be read", ids);
        let _ = writeln!(prompt, "- The parent's own id is {}", caller_id);
        let _ = writeln!(prompt, "- Every query MUST filter on these student ids");
        let _ = writeln!(
            prompt,
            "- Never read data of other students or parents; if the question names another student, return no SQL\n"
        );

        let _ = writeln!(prompt, "## Mandatory filters");
        let _ = writeln!(prompt, "- Student data: WHERE e.IdPersonne IN ({})", ids);
        let _ = writeln!(
            prompt,
            "- Enrollments: WHERE ie.Eleve IN (SELECT id FROM eleve WHERE IdPersonne IN ({}))",
            ids
        );
        let _ = writeln!(
            prompt,
            "- Results: WHERE ed.idenelev IN (SELECT idedusrv FROM eleve WHERE IdPersonne IN ({}))\n",
            ids
        );

        self.add_conventions(&mut prompt);
        self.add_schema(&mut prompt);
        Self::add_task(&mut prompt, question);
        prompt
    }

    /// Prompt asking for a fixed version of a query that failed to execute
    pub fn build_correction_prompt(&self, failed_sql: &str, error: &str) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Fix this SQL query.\n");
        let _ = writeln!(prompt, "**Query:** {}", failed_sql);
        let _ = writeln!(prompt, "**Error:** {}\n", error);
        self.add_schema(&mut prompt);
        let _ = writeln!(prompt, "## Output Format");
        let _ = writeln!(
            prompt,
            "Return only the corrected SQL query. Keep every existing WHERE filter on IdPersonne unchanged."
        );
        prompt
    }

    fn add_conventions(&self, prompt: &mut String) {
        let _ = writeln!(prompt, "## Conventions");
        let _ = writeln!(
            prompt,
            "- The school year is anneescolaire.AnneeScolaire, written 'XXXX/YYYY'"
        );
        let _ = writeln!(
            prompt,
            "- Trimester ids: trimestre 1 = 31, trimestre 2 = 32, trimestre 3 = 33"
        );
        let _ = writeln!(
            prompt,
            "- Names and phone numbers live in personne, linked from eleve and parent by IdPersonne"
        );
        let _ = writeln!(prompt, "- Quote class codes: CODECLASSEFR = '8B2'");
        let _ = writeln!(prompt, "- Use explicit JOINs instead of scalar subqueries\n");
    }

    fn add_schema(&self, prompt: &mut String) {
        let Some(schema) = &self.schema else {
            return;
        };
        if !schema.table_info.trim().is_empty() {
            let _ = writeln!(prompt, "## Tables\n{}\n", schema.table_info.trim());
        }
        if !schema.domain_descriptions.is_empty() {
            let _ = writeln!(prompt, "## Domains");
            for description in &schema.domain_descriptions {
                let _ = writeln!(prompt, "- {}", description);
            }
            let _ = writeln!(prompt);
        }
        if !schema.relations.trim().is_empty() {
            let _ = writeln!(prompt, "## Relations\n{}\n", schema.relations.trim());
        }
    }

    fn add_task(prompt: &mut String, question: &str) {
        let _ = writeln!(prompt, "## Task");
        let _ = writeln!(prompt, "Question: {}\n", question);
        let _ = writeln!(prompt, "## Output Format");
        let _ = writeln!(
            prompt,
            "Provide only the SQL query without explanation or markdown formatting."
        );
    }
}
