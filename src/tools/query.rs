//! Query tools.
//!
//! `query_database` runs caller-supplied SQL; `natural_language_query`
//! translates a question first and then takes the same execution path.
//! Both report failures as `{ success: false, error }` instead of protocol
//! errors so the caller can read the reason and rephrase.

use crate::db::{QueryExecutor, SchemaCache};
use crate::error::DbError;
use crate::models::{JsonRow, QueryResult};
use crate::nl::Translator;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Input for the query_database tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryDatabaseInput {
    /// A single read-only SELECT or WITH statement
    pub query: String,
}

/// Input for the natural_language_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NaturalLanguageQueryInput {
    /// Question about the data, in plain language
    pub question: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Output from the query_database tool.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct QueryDatabaseOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Result rows as column-to-value maps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<JsonRow>>,
    /// True if more rows were available than the server's row cap
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryDatabaseOutput {
    pub fn from_result(result: QueryResult) -> Self {
        Self {
            success: true,
            row_count: Some(result.row_count),
            data: Some(result.rows),
            truncated: result.truncated,
            execution_time_ms: Some(result.execution_time_ms),
            error: None,
        }
    }

    pub fn from_error(err: &DbError) -> Self {
        Self {
            success: false,
            error: Some(err.caller_message()),
            ..Default::default()
        }
    }
}

/// Output from the natural_language_query tool.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct NaturalLanguageQueryOutput {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// The SQL that was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<JsonRow>>,
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NaturalLanguageQueryOutput {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Handler for the two query tools.
pub struct QueryToolHandler {
    executor: Arc<QueryExecutor>,
    translator: Arc<Translator>,
    schema: Arc<SchemaCache>,
}

impl QueryToolHandler {
    pub fn new(
        executor: Arc<QueryExecutor>,
        translator: Arc<Translator>,
        schema: Arc<SchemaCache>,
    ) -> Self {
        Self {
            executor,
            translator,
            schema,
        }
    }

    pub async fn query_database(&self, input: QueryDatabaseInput) -> QueryDatabaseOutput {
        match self.executor.run(&input.query).await {
            Ok(result) => QueryDatabaseOutput::from_result(result),
            Err(e) => {
                warn!(error = %e, "query_database failed");
                QueryDatabaseOutput::from_error(&e)
            }
        }
    }

    pub async fn natural_language_query(
        &self,
        input: NaturalLanguageQueryInput,
    ) -> NaturalLanguageQueryOutput {
        if !self.translator.is_enabled() {
            return NaturalLanguageQueryOutput::failure(
                crate::nl::translator::MISSING_API_KEY,
            );
        }

        // The snapshot is an owned Arc; no pooled connection is held while the
        // language model is working.
        let snapshot = match self.schema.load(false).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Schema unavailable for translation");
                return NaturalLanguageQueryOutput::failure(e.caller_message());
            }
        };

        let translation = self.translator.translate(&input.question, &snapshot).await;
        let Some(sql) = translation.executable_sql().map(str::to_string) else {
            let error = translation
                .error
                .clone()
                .unwrap_or_else(|| "Failed to convert question to SQL".to_string());
            return NaturalLanguageQueryOutput::failure(error);
        };

        info!(attempts = translation.attempts, "Executing translated query");
        match self.executor.run(&sql).await {
            Ok(result) => NaturalLanguageQueryOutput {
                success: true,
                question: Some(translation.question),
                sql: Some(sql),
                explanation: translation.explanation,
                row_count: Some(result.row_count),
                data: Some(result.rows),
                truncated: result.truncated,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Translated query failed");
                NaturalLanguageQueryOutput {
                    sql: Some(sql),
                    ..NaturalLanguageQueryOutput::failure(e.caller_message())
                }
            }
        }
    }
}
