//! Transactions with deferred set/inc batching.
//!
//! `set` and `atomic_inc` do not emit SQL immediately. Consecutive operations
//! of the same kind that target the same table, scope, and bound pattern
//! values merge into one multi-column statement; anything that breaks
//! mergeability (or an operation of the other kind) flushes the queue first.
//! The first error inside a transaction is sticky: later operations become
//! no-ops and commit turns into rollback reporting that error.

use std::sync::Arc;

use sqldict_driver::{AffectedRows, SqlStatement, SqlTransaction};
use sqldict_error::{DictError, Result};
use sqldict_types::op::DictOpSettings;
use sqldict_types::path::is_private_path;
use sqldict_types::settings::DictMap;
use tracing::debug;

use crate::SqlDict;
use crate::pattern::find_map;
use crate::query::{
    IncField, SetField, delete_statement, increment_statement, init_statement, upsert_statement,
};
use crate::unix_now;

/// How a successful commit resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All statements applied.
    Ok,
    /// An increment batch matched zero rows; nothing to retry, the row simply
    /// does not exist.
    NotFound,
}

struct PendingSet<'a> {
    map: &'a DictMap,
    key: String,
    value: String,
}

struct PendingInc<'a> {
    map: &'a DictMap,
    key: String,
    diff: i64,
}

/// An open dictionary transaction. Created by [`SqlDict::transaction`];
/// dropped without commit it rolls back.
pub struct SqlDictTransaction<'a> {
    dict: &'a SqlDict,
    op: DictOpSettings,
    sql: Option<Box<dyn SqlTransaction>>,
    pending_sets: Vec<PendingSet<'a>>,
    pending_incs: Vec<PendingInc<'a>>,
    inc_rows: Vec<Arc<AffectedRows>>,
    error: Option<DictError>,
    changed: bool,
}

impl<'a> SqlDictTransaction<'a> {
    pub(crate) fn new(dict: &'a SqlDict, op: DictOpSettings) -> Self {
        Self {
            dict,
            op,
            sql: Some(dict.db().begin()),
            pending_sets: Vec::new(),
            pending_incs: Vec::new(),
            inc_rows: Vec::new(),
            error: None,
            changed: false,
        }
    }

    /// Write `value` at `key`, replacing any existing row.
    pub fn set(&mut self, key: &str, value: &str) {
        if self.error.is_some() {
            return;
        }
        // an inc queued earlier could target the same row
        self.flush_incs();
        if self.error.is_some() {
            return;
        }
        let (map, values) = match find_map(self.dict.settings(), key) {
            Ok(found) => found,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        if let Some(prev) = self.pending_sets.first() {
            if !self.mergeable(prev.map, &prev.key, map, key, &values) {
                self.flush_sets();
            }
        }
        if self.error.is_some() {
            return;
        }
        self.pending_sets.push(PendingSet {
            map,
            key: key.to_owned(),
            value: value.to_owned(),
        });
        self.changed = true;
    }

    /// Delete the row at `key`.
    pub fn unset(&mut self, key: &str) {
        if self.error.is_some() {
            return;
        }
        // the deleted row could be one a pending set/inc touches
        self.flush_incs();
        self.flush_sets();
        if self.error.is_some() {
            return;
        }
        let (map, values) = match find_map(self.dict.settings(), key) {
            Ok(found) => found,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        let username = is_private_path(key).then(|| self.op.username.clone());
        match delete_statement(map, &values, username.as_deref(), self.dict.db().table_prefix()) {
            Ok((sql, params)) => {
                let stmt = self.stmt_init(sql, params);
                if let Some(tx) = self.sql.as_mut() {
                    tx.update(stmt);
                }
                self.changed = true;
            }
            Err(e) => self.fail(e),
        }
    }

    /// Add `diff` to the integer value at `key`. A key whose row does not
    /// exist makes the commit resolve as [`CommitOutcome::NotFound`].
    pub fn atomic_inc(&mut self, key: &str, diff: i64) {
        if self.error.is_some() {
            return;
        }
        // a set queued earlier could target the same row
        self.flush_sets();
        if self.error.is_some() {
            return;
        }
        let (map, values) = match find_map(self.dict.settings(), key) {
            Ok(found) => found,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        if let Some(prev) = self.pending_incs.first() {
            if !self.mergeable(prev.map, &prev.key, map, key, &values) {
                self.flush_incs();
            }
        }
        if self.error.is_some() {
            return;
        }
        self.pending_incs.push(PendingInc {
            map,
            key: key.to_owned(),
            diff,
        });
        self.changed = true;
    }

    /// Commit, blocking until the driver acknowledges.
    pub fn commit_sync(mut self) -> Result<CommitOutcome> {
        self.flush_incs();
        self.flush_sets();
        let Some(sql) = self.sql.take() else {
            return Err(DictError::sql("transaction already finished"));
        };
        if let Some(e) = self.error.take() {
            sql.rollback();
            return Err(e);
        }
        if !self.changed {
            // nothing queued, no need to commit
            sql.rollback();
            return Ok(CommitOutcome::Ok);
        }
        sql.commit_sync()?;
        Ok(self.resolve_outcome())
    }

    /// Commit through the driver's async entrypoint.
    pub async fn commit(mut self) -> Result<CommitOutcome> {
        self.flush_incs();
        self.flush_sets();
        let Some(sql) = self.sql.take() else {
            return Err(DictError::sql("transaction already finished"));
        };
        if let Some(e) = self.error.take() {
            sql.rollback();
            return Err(e);
        }
        if !self.changed {
            sql.rollback();
            return Ok(CommitOutcome::Ok);
        }
        sql.commit().await?;
        Ok(self.resolve_outcome())
    }

    /// Abort: drop the queues and roll the SQL transaction back.
    pub fn rollback(mut self) {
        self.pending_sets.clear();
        self.pending_incs.clear();
        if let Some(sql) = self.sql.take() {
            sql.rollback();
        }
    }

    /// Record the first error; later ones are dropped.
    fn fail(&mut self, error: DictError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn resolve_outcome(&self) -> CommitOutcome {
        if self.inc_rows.iter().any(|rows| rows.get() == Some(0)) {
            CommitOutcome::NotFound
        } else {
            CommitOutcome::Ok
        }
    }

    /// Whether an operation on `(map2, key2)` may share a statement with the
    /// queued operation on `(map1, key1)`: same table, same scope prefix,
    /// same username column for private keys, and identical bound pattern
    /// values.
    fn mergeable(
        &self,
        map1: &DictMap,
        key1: &str,
        map2: &DictMap,
        key2: &str,
        values2: &[String],
    ) -> bool {
        if map1.table != map2.table {
            return false;
        }
        if key1.as_bytes().first() != key2.as_bytes().first() {
            return false;
        }
        if is_private_path(key1) && map1.username_field != map2.username_field {
            return false;
        }
        let Ok((_, values1)) = find_map(self.dict.settings(), key1) else {
            return false;
        };
        values1 == values2
    }

    fn flush_sets(&mut self) {
        if self.pending_sets.is_empty() {
            return;
        }
        let sets = std::mem::take(&mut self.pending_sets);
        if self.error.is_some() {
            return;
        }
        // the bound values are identical across the batch; re-derive them
        // from the first key (matched successfully at enqueue time)
        let pattern_values = match find_map(self.dict.settings(), &sets[0].key) {
            Ok((_, values)) => values,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        let username = is_private_path(&sets[0].key).then(|| self.op.username.clone());
        let expire_at = (self.op.expire_secs > 0)
            .then(|| unix_now().saturating_add(i64::try_from(self.op.expire_secs).unwrap_or(0)));
        let fields: Vec<SetField<'_>> = sets
            .iter()
            .map(|set| SetField {
                map: set.map,
                value: &set.value,
            })
            .collect();
        debug!(count = fields.len(), first_key = %sets[0].key, "flush set batch");
        match upsert_statement(
            self.dict.db().capabilities(),
            self.dict.db().table_prefix(),
            &fields,
            &pattern_values,
            username.as_deref(),
            expire_at,
        ) {
            Ok((sql, params)) => {
                let stmt = self.stmt_init(sql, params);
                if let Some(tx) = self.sql.as_mut() {
                    tx.update(stmt);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn flush_incs(&mut self) {
        if self.pending_incs.is_empty() {
            return;
        }
        let incs = std::mem::take(&mut self.pending_incs);
        if self.error.is_some() {
            return;
        }
        let pattern_values = match find_map(self.dict.settings(), &incs[0].key) {
            Ok((_, values)) => values,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        let username = is_private_path(&incs[0].key).then(|| self.op.username.clone());
        let fields: Vec<IncField<'_>> = incs
            .iter()
            .map(|inc| IncField {
                map: inc.map,
                diff: inc.diff,
            })
            .collect();
        debug!(count = fields.len(), first_key = %incs[0].key, "flush inc batch");
        match increment_statement(
            self.dict.db().table_prefix(),
            &fields,
            &pattern_values,
            username.as_deref(),
        ) {
            Ok((sql, params)) => {
                let stmt = self.stmt_init(sql, params);
                let rows = AffectedRows::new();
                if let Some(tx) = self.sql.as_mut() {
                    tx.update_rows(stmt, Arc::clone(&rows));
                }
                self.inc_rows.push(rows);
            }
            Err(e) => self.fail(e),
        }
    }

    fn stmt_init(&self, sql: String, params: Vec<sqldict_types::SqlParam>) -> SqlStatement {
        let mut stmt = init_statement(self.dict.db().as_ref(), sql, params);
        if let Some(timestamp) = self.op.timestamp {
            stmt.set_timestamp(timestamp);
        }
        if self.op.hide_log_values {
            stmt.set_hide_log_values(true);
        }
        stmt
    }
}

impl Drop for SqlDictTransaction<'_> {
    fn drop(&mut self) {
        if let Some(sql) = self.sql.take() {
            sql.rollback();
        }
    }
}
