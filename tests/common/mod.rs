//! Shared fakes for integration tests.
//!
//! `FakeFactory` hands out scripted in-memory sessions so pool, executor and
//! schema behaviour can be tested without a PostgreSQL server.
//! `ScriptedGenerator` replays canned language model answers.

#![allow(dead_code)]

use async_trait::async_trait;
use pg_gateway_mcp::db::{ConnectionFactory, ConnectionPool, DbConnection, PoolOptions};
use pg_gateway_mcp::error::{DbError, DbResult};
use pg_gateway_mcp::models::{FetchedRows, JsonRow, QueryParam};
use pg_gateway_mcp::nl::{GenerationRequest, SqlGenerator};
use serde_json::{Value as JsonValue, json};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn row(value: JsonValue) -> JsonRow {
    value.as_object().cloned().expect("row must be a JSON object")
}

/// What a fake session does on its next `fetch`.
pub enum Step {
    Rows(Vec<JsonRow>),
    Fail(DbError),
}

#[derive(Default)]
pub struct FakeState {
    /// Sessions ever opened.
    pub opened: AtomicUsize,
    /// Sessions closed by the pool.
    pub closed: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub ping_calls: AtomicUsize,
    /// Sessions currently inside a fetch, and the highest value seen.
    pub active: AtomicUsize,
    pub peak_active: AtomicUsize,
    /// Session ids currently inside a fetch; a duplicate means double assignment.
    pub busy_ids: Mutex<HashSet<usize>>,
    pub double_assigned: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fetch_delay: Mutex<Duration>,
    pub connect_delay: Mutex<Duration>,
    pub script: Mutex<VecDeque<Step>>,
    pub executed: Mutex<Vec<String>>,
    pub catalog_tables: Mutex<Vec<JsonRow>>,
    pub catalog_columns: Mutex<Vec<JsonRow>>,
    pub catalog_reads: AtomicUsize,
    pub fail_catalog: AtomicBool,
}

impl FakeState {
    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Replace the catalog with `tables`, each given as (name, [(column, type, nullable)]).
    pub fn set_catalog(&self, tables: &[(&str, &[(&str, &str, bool)])]) {
        let mut table_rows = Vec::new();
        let mut column_rows = Vec::new();
        for (table, columns) in tables {
            table_rows.push(row(json!({ "table_name": table })));
            for (name, data_type, nullable) in columns.iter() {
                column_rows.push(row(json!({
                    "table_name": table,
                    "column_name": name,
                    "data_type": data_type,
                    "is_nullable": nullable,
                    "column_default": null,
                    "character_maximum_length": null,
                })));
            }
        }
        *self.catalog_tables.lock().unwrap() = table_rows;
        *self.catalog_columns.lock().unwrap() = column_rows;
    }
}

pub struct FakeConnection {
    id: usize,
    state: Arc<FakeState>,
}

#[async_trait]
impl DbConnection for FakeConnection {
    async fn ping(&mut self) -> DbResult<()> {
        self.state.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::connection_broken("ping failed"));
        }
        Ok(())
    }

    async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        row_limit: usize,
    ) -> DbResult<FetchedRows> {
        let state = Arc::clone(&self.state);
        state.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if !state.busy_ids.lock().unwrap().insert(self.id) {
            state.double_assigned.store(true, Ordering::SeqCst);
        }
        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_active.fetch_max(now, Ordering::SeqCst);

        let delay = *state.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        state.active.fetch_sub(1, Ordering::SeqCst);
        state.busy_ids.lock().unwrap().remove(&self.id);

        // Catalog reads are bound; caller SQL never is
        if !params.is_empty() {
            state.catalog_reads.fetch_add(1, Ordering::SeqCst);
            if state.fail_catalog.load(Ordering::SeqCst) {
                return Err(DbError::execution(
                    "permission denied for schema public",
                    Some("42501".to_string()),
                ));
            }
            let rows = if sql.contains("information_schema.columns") {
                state.catalog_columns.lock().unwrap().clone()
            } else {
                state.catalog_tables.lock().unwrap().clone()
            };
            return Ok(FetchedRows::from_capped(Vec::new(), rows, row_limit));
        }

        state.executed.lock().unwrap().push(sql.to_string());
        let step = state.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Rows(rows)) => {
                let columns = rows
                    .first()
                    .map(|r| r.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(FetchedRows::from_capped(columns, rows, row_limit))
            }
            None => Ok(FetchedRows::from_capped(
                vec!["?column?".to_string()],
                vec![row(json!({ "?column?": 1 }))],
                row_limit,
            )),
        }
    }

    async fn close(self: Box<Self>) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub state: Arc<FakeState>,
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(&self) -> DbResult<Box<dyn DbConnection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection("connection refused", "Check the server"));
        }
        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeConnection {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

pub fn pool_options(min_size: usize, max_size: usize) -> PoolOptions {
    PoolOptions {
        min_size,
        max_size,
        acquire_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// A pool over a fresh fake factory, not yet initialized.
pub fn fake_pool(min_size: usize, max_size: usize) -> (Arc<ConnectionPool>, Arc<FakeState>) {
    let factory = FakeFactory::default();
    let state = Arc::clone(&factory.state);
    let pool = ConnectionPool::new(Arc::new(factory), pool_options(min_size, max_size))
        .expect("valid pool options");
    (pool, state)
}

/// Replays canned answers in order and records every request.
pub struct ScriptedGenerator {
    answers: Mutex<VecDeque<DbResult<String>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(answers: Vec<DbResult<String>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_answers(answers: &[&str]) -> Self {
        Self::new(answers.iter().map(|a| Ok(a.to_string())).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SqlGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> DbResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DbError::translation_failed("script exhausted")))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
