//! Multi-map streaming iteration.
//!
//! An iteration walks the configured maps in declaration order, runs the
//! partial matcher against each, and streams the rows of every map that
//! matches the path prefix. Keys are rebuilt from result rows by walking the
//! unconsumed pattern tail and substituting `$` occurrences with the decoded
//! pattern columns. Once one map has produced rows, running out of further
//! matching maps simply ends the stream instead of erroring.

use std::fmt::Write as _;

use sqldict_driver::{SqlRows, SqlStatement};
use sqldict_error::{DictError, Result};
use sqldict_types::op::{DictOpSettings, IterateFlags};
use sqldict_types::path::is_private_path;
use sqldict_types::settings::DictMap;
use tracing::debug;

use crate::SqlDict;
use crate::lookup::{decode_values, next_live_row, next_live_row_sync};
use crate::pattern::{MatchOutcome, match_pattern};
use crate::query::{RecurseMode, build_where, init_statement};
use crate::unix_now;

/// One iteration result: the reconstructed key and its decoded values.
/// Values are empty under [`IterateFlags::NO_VALUE`].
pub type DictEntry = (String, Vec<String>);

/// An in-progress iteration. Obtained from [`SqlDict::iterate`]; drive it
/// with [`next`](Self::next) or [`next_sync`](Self::next_sync) and close it
/// with [`finish`](Self::finish) to observe a deferred error.
pub struct SqlDictIter<'a> {
    dict: &'a SqlDict,
    op: DictOpSettings,
    path: String,
    flags: IterateFlags,

    map: Option<&'a DictMap>,
    rows: Option<Box<dyn SqlRows>>,
    key_prefix_len: usize,
    pattern_prefix_len: usize,
    sql_fields_start_idx: usize,
    next_map_idx: usize,
    allow_null_map: bool,
    query_sent: bool,
    rows_returned: u64,
    error: Option<DictError>,
    done: bool,
}

impl<'a> SqlDictIter<'a> {
    pub(crate) fn new(
        dict: &'a SqlDict,
        op: DictOpSettings,
        path: &str,
        flags: IterateFlags,
    ) -> Self {
        Self {
            dict,
            op,
            path: path.to_owned(),
            flags,
            map: None,
            rows: None,
            key_prefix_len: 0,
            pattern_prefix_len: 0,
            sql_fields_start_idx: 0,
            next_map_idx: 0,
            allow_null_map: false,
            query_sent: false,
            rows_returned: 0,
            error: None,
            done: false,
        }
    }

    /// Fetch the next entry, blocking on the driver. Returns `Ok(None)` at
    /// the end of the stream.
    pub fn next_sync(&mut self) -> Result<Option<DictEntry>> {
        loop {
            let Some(map) = self.advance_sync()? else {
                return Ok(None);
            };
            let Some(rows) = self.rows.as_mut() else {
                return Ok(None);
            };
            match next_live_row_sync(map, rows, unix_now()) {
                Ok(true) => return self.emit_current_row(map).map(Some),
                Ok(false) => {
                    if self.current_map_exhausted() {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Fetch the next entry. Suspends only inside the driver, and only when
    /// the iteration was opened with [`IterateFlags::ASYNC`].
    pub async fn next(&mut self) -> Result<Option<DictEntry>> {
        loop {
            let Some(map) = self.advance_async().await? else {
                return Ok(None);
            };
            let Some(rows) = self.rows.as_mut() else {
                return Ok(None);
            };
            let found = if self.flags.contains(IterateFlags::ASYNC) {
                next_live_row(map, rows, unix_now()).await
            } else {
                next_live_row_sync(map, rows, unix_now())
            };
            match found {
                Ok(true) => return self.emit_current_row(map).map(Some),
                Ok(false) => {
                    if self.current_map_exhausted() {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Close the iteration, reporting any error that ended the stream early.
    pub fn finish(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Ensure a query is in flight; returns the current map, or `None` once
    /// the iteration is over.
    fn advance_sync(&mut self) -> Result<Option<&'a DictMap>> {
        if self.stream_over() {
            return Ok(None);
        }
        if !self.query_sent {
            match self.build_next_statement()? {
                None => return Ok(None),
                Some(stmt) => {
                    let rows = self.dict.db().query_sync(stmt).map_err(|e| self.fail(e))?;
                    self.rows = Some(rows);
                    self.query_sent = true;
                }
            }
        }
        Ok(self.map)
    }

    async fn advance_async(&mut self) -> Result<Option<&'a DictMap>> {
        if self.stream_over() {
            return Ok(None);
        }
        if !self.query_sent {
            match self.build_next_statement()? {
                None => return Ok(None),
                Some(stmt) => {
                    let result = if self.flags.contains(IterateFlags::ASYNC) {
                        self.dict.db().query(stmt).await
                    } else {
                        self.dict.db().query_sync(stmt)
                    };
                    let rows = result.map_err(|e| self.fail(e))?;
                    self.rows = Some(rows);
                    self.query_sent = true;
                }
            }
        }
        Ok(self.map)
    }

    fn stream_over(&self) -> bool {
        self.done
            || self.error.is_some()
            || (self.op.max_rows > 0 && self.rows_returned >= self.op.max_rows)
    }

    /// The current map ran dry. Returns `true` when the whole iteration is
    /// over; otherwise the next matching map will be queried.
    fn current_map_exhausted(&mut self) -> bool {
        if self.flags.contains(IterateFlags::EXACT_KEY) {
            // an exact key never chains into further maps
            self.done = true;
            return true;
        }
        self.query_sent = false;
        // some results were produced (or at least one map was queried), so a
        // missing next map is no longer an error
        self.allow_null_map = true;
        false
    }

    fn fail(&mut self, error: DictError) -> DictError {
        self.done = true;
        self.error = Some(error.clone());
        error
    }

    /// Find the next matching map and build its SELECT. `Ok(None)` means the
    /// iteration is complete.
    fn build_next_statement(&mut self) -> Result<Option<SqlStatement>> {
        let recurse = self.flags.contains(IterateFlags::RECURSE);
        let maps = &self.dict.settings().maps;

        let mut selected = None;
        for (idx, map) in maps.iter().enumerate().skip(self.next_map_idx) {
            if let MatchOutcome::Match(m) = match_pattern(&map.pattern, &self.path, true, recurse) {
                // without recursion, only the single enumerated child may be
                // unbound
                if recurse || m.values.len() + 1 >= map.pattern_fields.len() {
                    selected = Some((idx, map, m));
                    break;
                }
            }
        }
        let Some((idx, map, matched)) = selected else {
            if self.allow_null_map {
                self.done = true;
                return Ok(None);
            }
            return Err(self.fail(DictError::unmapped(&self.path)));
        };

        self.key_prefix_len = matched.path_consumed;
        self.pattern_prefix_len = matched.pattern_consumed;
        self.next_map_idx = idx + 1;
        self.map = Some(map);
        self.rows = None;

        let mut sql = String::from("SELECT ");
        if let Some(expire) = &map.expire_field {
            let _ = write!(sql, "{expire},");
        }
        if !self.flags.contains(IterateFlags::NO_VALUE) {
            let _ = write!(sql, "{},", map.value_projection());
        }
        // project every unbound pattern column; when the path bound them all,
        // still fetch the last one since its children are being enumerated
        let count = map.pattern_fields.len();
        let mut start_idx = matched.values.len();
        if start_idx == count && count > 0 {
            start_idx -= 1;
        }
        self.sql_fields_start_idx = start_idx;
        for field in &map.pattern_fields[start_idx..] {
            let _ = write!(sql, "{},", field.name);
        }
        if sql.ends_with(',') {
            sql.pop();
        } else {
            // nothing projected (literal pattern, no value wanted): probe for
            // row existence
            sql.push('1');
        }
        let _ = write!(sql, " FROM {}{}", self.dict.db().table_prefix(), map.table);

        let mode = if recurse {
            RecurseMode::Full
        } else if self.flags.contains(IterateFlags::EXACT_KEY) {
            RecurseMode::None
        } else {
            RecurseMode::One
        };
        let username = is_private_path(&self.path).then_some(self.op.username.as_str());
        let mut params = Vec::new();
        build_where(map, &matched.values, username, mode, &mut sql, &mut params)
            .map_err(|e| self.fail(e))?;

        if self.flags.contains(IterateFlags::SORT_BY_KEY) && !map.pattern_fields.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, field) in map.pattern_fields.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str(&field.name);
            }
        } else if self.flags.contains(IterateFlags::SORT_BY_VALUE) {
            let _ = write!(sql, " ORDER BY {}", map.value_projection());
        }
        if self.op.max_rows > 0 {
            let _ = write!(sql, " LIMIT {}", self.op.max_rows - self.rows_returned);
        }

        debug!(query = %sql, path = %self.path, "dict iterate");
        Ok(Some(init_statement(self.dict.db().as_ref(), sql, params)))
    }

    /// Rebuild the dict key for the current row and decode its values.
    fn emit_current_row(&mut self, map: &DictMap) -> Result<DictEntry> {
        let tail = &map.pattern[self.pattern_prefix_len..];
        let wildcards = tail.bytes().filter(|&b| b == b'$').count();
        if self.sql_fields_start_idx + wildcards > map.pattern_fields.len() {
            let err = DictError::config(format!(
                "map {} binds more wildcards than pattern fields",
                map.pattern
            ));
            return Err(self.fail(err));
        }
        let Some(rows) = self.rows.as_ref() else {
            return Err(self.fail(DictError::sql("iteration has no result")));
        };

        let mut key = self.path[..self.key_prefix_len].to_owned();
        if self.key_prefix_len > 0 && !key.ends_with('/') {
            key.push('/');
        }

        let value_count = if self.flags.contains(IterateFlags::NO_VALUE) {
            0
        } else {
            map.value_fields.len()
        };
        let mut result_idx = usize::from(map.expire_field.is_some()) + value_count;
        let mut fields = map.pattern_fields[self.sql_fields_start_idx..].iter();
        for ch in tail.chars() {
            if ch != '$' {
                key.push(ch);
                continue;
            }
            let Some(field) = fields.next() else {
                break;
            };
            key.push_str(&field.value_type.decode(&rows.column(result_idx)));
            result_idx += 1;
        }

        let values = if self.flags.contains(IterateFlags::NO_VALUE) {
            Vec::new()
        } else {
            decode_values(map, rows.as_ref())
        };

        self.rows_returned += 1;
        if self.flags.contains(IterateFlags::EXACT_KEY) {
            self.done = true;
        }
        Ok((key, values))
    }
}
