//! Natural language to SQL translation.
//!
//! The translator never executes anything. It asks the generator for one
//! candidate, validates it, and on rejection asks exactly once more with the
//! rejection reason. Whatever it returns has already been through the
//! validator; callers execute `generated_sql` only when `verdict.allowed`.

use crate::models::SchemaSnapshot;
use crate::nl::generator::{GenerationRequest, SqlGenerator};
use crate::nl::prompt;
use crate::sql::{SqlValidator, ValidationVerdict};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Candidates requested per question: the first attempt plus one retry.
pub const MAX_ATTEMPTS: u32 = 2;

pub const MISSING_API_KEY: &str = "language model API key not configured";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult {
    pub question: String,
    /// Normalized text on success, the last rejected candidate otherwise.
    pub generated_sql: Option<String>,
    pub explanation: Option<String>,
    pub verdict: Option<ValidationVerdict>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl TranslationResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.verdict.as_ref().is_some_and(|v| v.allowed)
    }

    /// SQL that is safe to hand to the executor, if any.
    pub fn executable_sql(&self) -> Option<&str> {
        if self.succeeded() {
            self.generated_sql.as_deref()
        } else {
            None
        }
    }

    fn failed(question: &str, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            question: question.to_string(),
            generated_sql: None,
            explanation: None,
            verdict: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// Remove markdown code fences the model may wrap around its answer.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.trim().lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            let rest = trimmed.trim_start_matches('`');
            let rest = rest
                .strip_prefix("sql")
                .or_else(|| rest.strip_prefix("SQL"))
                .or_else(|| rest.strip_prefix("postgresql"))
                .unwrap_or(rest);
            if !rest.trim().is_empty() {
                out.push_str(rest.trim_end_matches('`').trim());
                out.push('\n');
            }
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

pub struct Translator {
    generator: Option<Arc<dyn SqlGenerator>>,
    validator: Arc<SqlValidator>,
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("model", &self.generator.as_ref().map(|g| g.model().to_string()))
            .finish()
    }
}

impl Translator {
    pub fn new(generator: Option<Arc<dyn SqlGenerator>>, validator: Arc<SqlValidator>) -> Self {
        if generator.is_none() {
            warn!("No language model configured; natural language queries are disabled");
        }
        Self {
            generator,
            validator,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn translate(&self, question: &str, schema: &SchemaSnapshot) -> TranslationResult {
        let question = question.trim();
        if question.is_empty() {
            return TranslationResult::failed(question, "question must not be empty", 0);
        }
        let Some(generator) = self.generator.as_ref() else {
            return TranslationResult::failed(question, MISSING_API_KEY, 0);
        };

        let preview: String = question.chars().take(100).collect();
        info!(question = %preview, model = generator.model(), "Converting question to SQL");

        let system_prompt = prompt::system_prompt(&prompt::schema_context(schema, question));
        let mut user_prompt = prompt::user_prompt(question);
        let mut last_candidate = None;
        let mut last_verdict = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let request = GenerationRequest {
                system_prompt: system_prompt.clone(),
                user_prompt: user_prompt.clone(),
            };
            let raw = match generator.generate(&request).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(attempt, error = %e, "Language model call failed");
                    let mut result = TranslationResult::failed(
                        question,
                        format!("Error converting query: {}", e.client_message()),
                        attempt,
                    );
                    result.generated_sql = last_candidate;
                    result.verdict = last_verdict;
                    return result;
                }
            };

            let candidate = strip_code_fences(&raw);
            let verdict = self.validator.validate(&candidate);
            if verdict.allowed {
                info!(attempt, sql = %verdict.normalized_query, "Generated SQL accepted");
                return TranslationResult {
                    question: question.to_string(),
                    generated_sql: Some(verdict.normalized_query.clone()),
                    explanation: Some(format!("Converted '{}' to SQL query", question)),
                    verdict: Some(verdict),
                    error: None,
                    attempts: attempt,
                };
            }

            let reason = verdict.reason.clone().unwrap_or_default();
            warn!(attempt, sql = %candidate, reason = %reason, "Generated SQL failed validation");
            user_prompt = prompt::retry_prompt(question, &candidate, &reason);
            last_candidate = Some(candidate);
            last_verdict = Some(verdict);
        }

        let reason = last_verdict
            .as_ref()
            .and_then(|v| v.reason.clone())
            .unwrap_or_default();
        TranslationResult {
            question: question.to_string(),
            generated_sql: last_candidate,
            explanation: None,
            verdict: last_verdict,
            error: Some(format!("Generated SQL is invalid: {}", reason)),
            attempts: MAX_ATTEMPTS,
        }
    }
}
