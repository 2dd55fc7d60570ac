//! The SQL driver contract consumed by the dictionary core.
//!
//! The core never talks to a database directly; it builds [`SqlStatement`]s
//! and hands them to a [`SqlBackend`]. Backends advertise what they can do
//! through [`SqlCapabilities`], stream results through [`SqlRows`], and run
//! writes inside [`SqlTransaction`]s. The only suspension points in the whole
//! system are the async methods on these traits: statement issue, fetching
//! more rows, and transaction commit.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use sqldict_error::Result;
use sqldict_types::{RawValue, SqlParam};

pub mod cache;

pub use cache::{DbHandle, SqlDbCache};

bitflags::bitflags! {
    /// Feature bits a backend advertises once at startup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SqlCapabilities: u32 {
        /// The backend supports server-side prepared statements.
        const PREPARED_STATEMENTS = 0x01;
        /// The backend understands `INSERT … ON DUPLICATE KEY UPDATE`.
        const ON_DUPLICATE_KEY = 0x02;
        /// The backend understands `INSERT … ON CONFLICT (…) DO UPDATE SET`.
        const ON_CONFLICT_DO = 0x04;
    }
}

/// A statement ready for execution: query text plus parameters bound by
/// column index.
///
/// Statements are plain data; the backend decides how to execute them. The
/// `prepared` flag is set by the core iff the backend advertises
/// [`SqlCapabilities::PREPARED_STATEMENTS`], so backends with a prepared
/// cache know when to use it.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    query: String,
    params: Vec<SqlParam>,
    timestamp: Option<SystemTime>,
    hide_log_values: bool,
    prepared: bool,
}

impl SqlStatement {
    /// A plain statement.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Vec::new(),
            timestamp: None,
            hide_log_values: false,
            prepared: false,
        }
    }

    /// A statement marked for prepared execution.
    pub fn prepared(query: impl Into<String>) -> Self {
        let mut stmt = Self::new(query);
        stmt.prepared = true;
        stmt
    }

    /// Bind a parameter. Parameters are bound in column order; `column_idx`
    /// is the zero-based position of the next `?` placeholder.
    pub fn bind(&mut self, column_idx: usize, value: SqlParam) {
        debug_assert_eq!(column_idx, self.params.len());
        self.params.push(value);
    }

    /// Explicit commit time forwarded to backends that support it.
    pub fn set_timestamp(&mut self, timestamp: SystemTime) {
        self.timestamp = Some(timestamp);
    }

    /// Ask the backend not to log expanded parameter values.
    pub fn set_hide_log_values(&mut self, hide: bool) {
        self.hide_log_values = hide;
    }

    /// The SQL text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Bound parameters, in column order.
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// The timestamp override, if any.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Whether expanded values must be masked in driver logs.
    pub fn hide_log_values(&self) -> bool {
        self.hide_log_values
    }

    /// Whether the statement should run through the prepared-statement path.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}

/// A SQL connection.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Driver name, e.g. `mysql` or `pgsql`.
    fn name(&self) -> &str;

    /// Feature bits of this connection.
    fn capabilities(&self) -> SqlCapabilities;

    /// Prefix prepended to every table name.
    fn table_prefix(&self) -> &str {
        ""
    }

    /// Execute a query, blocking until the first result batch is available.
    fn query_sync(&self, stmt: SqlStatement) -> Result<Box<dyn SqlRows>>;

    /// Execute a query asynchronously.
    async fn query(&self, stmt: SqlStatement) -> Result<Box<dyn SqlRows>>;

    /// Begin a transaction.
    fn begin(&self) -> Box<dyn SqlTransaction>;

    /// Wait until the connection has no in-flight work.
    async fn wait(&self) {}
}

/// A streamed query result. The cursor starts before the first row.
#[async_trait]
pub trait SqlRows: Send {
    /// Advance to the next row, blocking if more rows must be fetched.
    /// Returns `false` once the result is exhausted.
    fn next_row_sync(&mut self) -> Result<bool>;

    /// Advance to the next row, suspending if more rows must be fetched.
    async fn next_row(&mut self) -> Result<bool>;

    /// Number of columns in the result.
    fn column_count(&self) -> usize;

    /// The value of `column_idx` in the current row. Out-of-range columns
    /// read as SQL NULL.
    fn column(&self, column_idx: usize) -> RawValue;
}

/// An open SQL transaction. Statements are submitted in order; the driver
/// preserves statement order within the transaction.
#[async_trait]
pub trait SqlTransaction: Send {
    /// Queue an update statement.
    fn update(&mut self, stmt: SqlStatement);

    /// Queue an update statement and capture its affected-row count into
    /// `rows` once it has executed.
    fn update_rows(&mut self, stmt: SqlStatement, rows: Arc<AffectedRows>);

    /// Commit, blocking until the driver acknowledges.
    fn commit_sync(self: Box<Self>) -> Result<()>;

    /// Commit asynchronously.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Abort the transaction.
    fn rollback(self: Box<Self>);
}

/// Affected-row count of one batched UPDATE, unknown until the driver has
/// executed the statement.
#[derive(Debug)]
pub struct AffectedRows(AtomicI64);

impl AffectedRows {
    /// A fresh, not-yet-known counter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(-1)))
    }

    /// Record the count. Called by the driver.
    pub fn set(&self, rows: u64) {
        self.0.store(i64::try_from(rows).unwrap_or(i64::MAX), Ordering::SeqCst);
    }

    /// The recorded count, or `None` if the statement has not executed.
    pub fn get(&self) -> Option<u64> {
        let v = self.0.load(Ordering::SeqCst);
        u64::try_from(v).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_binding_in_order() {
        let mut stmt = SqlStatement::new("SELECT v FROM t WHERE a = ? AND b = ?");
        stmt.bind(0, SqlParam::Text("x".to_owned()));
        stmt.bind(1, SqlParam::Int64(7));
        assert_eq!(stmt.params().len(), 2);
        assert!(!stmt.is_prepared());
        assert!(SqlStatement::prepared("SELECT 1").is_prepared());
    }

    #[test]
    fn affected_rows_starts_unknown() {
        let rows = AffectedRows::new();
        assert_eq!(rows.get(), None);
        rows.set(0);
        assert_eq!(rows.get(), Some(0));
        rows.set(3);
        assert_eq!(rows.get(), Some(3));
    }
}
