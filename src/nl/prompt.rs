//! Prompt construction for SQL generation.
//!
//! The schema context is bounded: at most [`MAX_CONTEXT_TABLES`] tables and
//! [`MAX_CONTEXT_CHARS`] characters, with tables whose names overlap the
//! question listed first.

use crate::models::{ColumnInfo, SchemaSnapshot};
use std::collections::BTreeSet;

pub const MAX_CONTEXT_TABLES: usize = 10;
pub const MAX_CONTEXT_CHARS: usize = 6000;

const NO_TABLES: &str = "No tables found in the database.";

const SYSTEM_TEMPLATE: &str = "You are a SQL expert that converts natural language questions into PostgreSQL SELECT queries.

Rules:
1. Only generate SELECT queries (read-only operations)
2. Use proper PostgreSQL syntax
3. Do not include any write operations (INSERT, UPDATE, DELETE, DROP, etc.)
4. Generate exactly one statement with no trailing text
5. Make queries efficient and use appropriate JOINs when needed
6. Return only the SQL query, no explanations in the query itself

Database Schema:
{schema}

Return the SQL query only, without markdown formatting or code blocks.";

pub fn system_prompt(schema_context: &str) -> String {
    SYSTEM_TEMPLATE.replace("{schema}", schema_context)
}

pub fn user_prompt(question: &str) -> String {
    format!(
        "Convert this natural language question to a PostgreSQL SELECT query:\n\n{}",
        question
    )
}

/// Follow-up prompt after the first candidate was rejected.
pub fn retry_prompt(question: &str, rejected_sql: &str, reason: &str) -> String {
    format!(
        "{}\n\nYour previous answer was rejected: {}\nRejected query:\n{}\n\n\
         Respond with a single read-only SELECT (or WITH ... SELECT) statement only. \
         Do not modify data, call functions with side effects, or use SELECT INTO.",
        user_prompt(question),
        reason,
        rejected_sql
    )
}

/// Lowercased words of length >= 2, with a trailing plural `s` also indexed.
fn words(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
    {
        let lower = word.to_lowercase();
        if let Some(stem) = lower.strip_suffix('s') {
            if stem.len() >= 2 {
                out.insert(stem.to_string());
            }
        }
        out.insert(lower);
    }
    out
}

fn relevance(question: &BTreeSet<String>, table: &str, columns: &[ColumnInfo]) -> usize {
    let table_words = words(table);
    let table_hits = table_words.intersection(question).count();
    let column_hits = columns
        .iter()
        .filter(|c| !words(&c.column_name).is_disjoint(question))
        .count();
    // A table-name match outweighs any number of column matches on another table.
    table_hits * 1000 + column_hits
}

fn format_table(table: &str, columns: &[ColumnInfo], budget: usize) -> Option<String> {
    let mut block = format!("Table: {}", table);
    if block.len() > budget {
        return None;
    }
    for col in columns {
        let line = format!("\n  {} ({})", col.column_name, col.data_type);
        if block.len() + line.len() > budget {
            break;
        }
        block.push_str(&line);
    }
    Some(block)
}

/// Render the tables most relevant to `question`.
pub fn schema_context(snapshot: &SchemaSnapshot, question: &str) -> String {
    if snapshot.tables.is_empty() {
        return NO_TABLES.to_string();
    }
    let question_words = words(question);

    let mut ranked: Vec<(&String, &Vec<ColumnInfo>, usize)> = snapshot
        .tables
        .iter()
        .map(|(name, cols)| (name, cols, relevance(&question_words, name, cols)))
        .collect();
    // Stable sort keeps alphabetical order among equal scores.
    ranked.sort_by(|a, b| b.2.cmp(&a.2));

    let mut context = String::new();
    for (name, cols, _) in ranked.into_iter().take(MAX_CONTEXT_TABLES) {
        let separator = if context.is_empty() { 0 } else { 2 };
        let remaining = MAX_CONTEXT_CHARS.saturating_sub(context.len() + separator);
        let Some(block) = format_table(name, cols, remaining) else {
            break;
        };
        if separator > 0 {
            context.push_str("\n\n");
        }
        context.push_str(&block);
    }
    context
}
