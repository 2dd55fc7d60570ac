//! Scripted SQL backend for tests.
//!
//! [`ScriptedBackend`] implements the driver contract without a database:
//! query results, affected-row counts, and failures are pushed in ahead of
//! time, and every executed statement is recorded so tests can assert the
//! exact SQL text and bound parameters the core emitted.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqldict_driver::{
    AffectedRows, SqlBackend, SqlCapabilities, SqlRows, SqlStatement, SqlTransaction,
};
use sqldict_error::{DictError, Result};
use sqldict_types::{RawValue, SqlParam};

/// One statement observed by the backend.
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    /// SQL text.
    pub sql: String,
    /// Bound parameters, in column order.
    pub params: Vec<SqlParam>,
    /// Whether it was submitted inside a transaction.
    pub in_transaction: bool,
    /// Whether the core elected prepared execution.
    pub prepared: bool,
}

#[derive(Default)]
struct ScriptedState {
    executed: Vec<ExecutedStatement>,
    results: VecDeque<Vec<Vec<RawValue>>>,
    query_errors: VecDeque<DictError>,
    affected: VecDeque<u64>,
    commit_errors: VecDeque<DictError>,
    commits: usize,
    rollbacks: usize,
}

/// An in-memory backend whose behavior is scripted by the test.
#[derive(Clone)]
pub struct ScriptedBackend {
    capabilities: SqlCapabilities,
    table_prefix: String,
    state: Arc<Mutex<ScriptedState>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// A backend advertising prepared statements and MySQL-style upserts.
    pub fn new() -> Self {
        Self {
            capabilities: SqlCapabilities::PREPARED_STATEMENTS | SqlCapabilities::ON_DUPLICATE_KEY,
            table_prefix: String::new(),
            state: Arc::new(Mutex::new(ScriptedState::default())),
        }
    }

    /// Override the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: SqlCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set a table prefix.
    #[must_use]
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Queue the result rows for the next query.
    pub fn push_rows(&self, rows: Vec<Vec<RawValue>>) {
        self.state.lock().results.push_back(rows);
    }

    /// Make the next query fail.
    pub fn push_query_error(&self, error: DictError) {
        self.state.lock().query_errors.push_back(error);
    }

    /// Queue the affected-row count reported by the next counted update.
    pub fn push_affected(&self, rows: u64) {
        self.state.lock().affected.push_back(rows);
    }

    /// Make the next commit fail.
    pub fn push_commit_error(&self, error: DictError) {
        self.state.lock().commit_errors.push_back(error);
    }

    /// Every statement executed so far.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.lock().executed.clone()
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    /// Number of rolled-back transactions.
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    fn record(&self, stmt: &SqlStatement, in_transaction: bool) {
        self.state.lock().executed.push(ExecutedStatement {
            sql: stmt.query().to_owned(),
            params: stmt.params().to_vec(),
            in_transaction,
            prepared: stmt.is_prepared(),
        });
    }

    fn run_query(&self, stmt: SqlStatement) -> Result<Box<dyn SqlRows>> {
        self.record(&stmt, false);
        let mut state = self.state.lock();
        if let Some(err) = state.query_errors.pop_front() {
            return Err(err);
        }
        let rows = state.results.pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedRows {
            rows: rows.into_iter().collect(),
            current: None,
        }))
    }
}

#[async_trait]
impl SqlBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> SqlCapabilities {
        self.capabilities
    }

    fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    fn query_sync(&self, stmt: SqlStatement) -> Result<Box<dyn SqlRows>> {
        self.run_query(stmt)
    }

    async fn query(&self, stmt: SqlStatement) -> Result<Box<dyn SqlRows>> {
        self.run_query(stmt)
    }

    fn begin(&self) -> Box<dyn SqlTransaction> {
        Box::new(ScriptedTransaction {
            backend: self.clone(),
        })
    }
}

struct ScriptedRows {
    rows: VecDeque<Vec<RawValue>>,
    current: Option<Vec<RawValue>>,
}

#[async_trait]
impl SqlRows for ScriptedRows {
    fn next_row_sync(&mut self) -> Result<bool> {
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }

    async fn next_row(&mut self) -> Result<bool> {
        self.next_row_sync()
    }

    fn column_count(&self) -> usize {
        self.current.as_ref().map_or(0, Vec::len)
    }

    fn column(&self, column_idx: usize) -> RawValue {
        self.current
            .as_ref()
            .and_then(|row| row.get(column_idx))
            .cloned()
            .unwrap_or(RawValue::Null)
    }
}

struct ScriptedTransaction {
    backend: ScriptedBackend,
}

#[async_trait]
impl SqlTransaction for ScriptedTransaction {
    fn update(&mut self, stmt: SqlStatement) {
        self.backend.record(&stmt, true);
    }

    fn update_rows(&mut self, stmt: SqlStatement, rows: Arc<AffectedRows>) {
        self.backend.record(&stmt, true);
        let affected = self.backend.state.lock().affected.pop_front().unwrap_or(0);
        rows.set(affected);
    }

    fn commit_sync(self: Box<Self>) -> Result<()> {
        let mut state = self.backend.state.lock();
        if let Some(err) = state.commit_errors.pop_front() {
            return Err(err);
        }
        state.commits += 1;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.commit_sync()
    }

    fn rollback(self: Box<Self>) {
        self.backend.state.lock().rollbacks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_rows_stream_in_order() {
        let backend = ScriptedBackend::new();
        backend.push_rows(vec![
            vec![RawValue::Text("1".to_owned())],
            vec![RawValue::Text("2".to_owned())],
        ]);
        let mut rows = backend
            .query_sync(SqlStatement::new("SELECT v FROM t"))
            .expect("query");
        assert!(rows.next_row_sync().expect("row 1"));
        assert_eq!(rows.column(0), RawValue::Text("1".to_owned()));
        assert!(rows.next_row_sync().expect("row 2"));
        assert_eq!(rows.column(0), RawValue::Text("2".to_owned()));
        assert!(!rows.next_row_sync().expect("end"));
        assert_eq!(backend.executed().len(), 1);
    }

    #[test]
    fn missing_script_yields_empty_result() {
        let backend = ScriptedBackend::new();
        let mut rows = backend
            .query_sync(SqlStatement::new("SELECT v FROM t"))
            .expect("query");
        assert!(!rows.next_row_sync().expect("empty"));
    }

    #[test]
    fn transaction_bookkeeping() {
        let backend = ScriptedBackend::new();
        backend.push_affected(2);
        let mut tx = backend.begin();
        tx.update(SqlStatement::new("DELETE FROM t"));
        let rows = AffectedRows::new();
        tx.update_rows(SqlStatement::new("UPDATE t SET v=v+1"), Arc::clone(&rows));
        tx.commit_sync().expect("commit");
        assert_eq!(rows.get(), Some(2));
        assert_eq!(backend.commits(), 1);
        let executed = backend.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed.iter().all(|s| s.in_transaction));
    }
}
