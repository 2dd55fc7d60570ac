//! Point lookup, sync and async.

use sqldict_driver::{SqlRows, SqlStatement};
use sqldict_error::Result;
use sqldict_types::op::DictOpSettings;
use sqldict_types::path::is_private_path;
use sqldict_types::settings::DictMap;
use tracing::debug;

use crate::SqlDict;
use crate::pattern::find_map;
use crate::query::{init_statement, lookup_select};
use crate::unix_now;

/// Whether the current row carries an expiry timestamp that has passed.
///
/// The expire column, when the map declares one, is always projected first.
/// NULL or unparsable timestamps never expire a row.
pub(crate) fn row_expired(map: &DictMap, rows: &dyn SqlRows, now: i64) -> bool {
    if map.expire_field.is_none() {
        return false;
    }
    let raw = rows.column(0);
    let text = match &raw {
        sqldict_types::RawValue::Null => return false,
        sqldict_types::RawValue::Text(s) => s.clone(),
        sqldict_types::RawValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
    };
    text.parse::<i64>().is_ok_and(|expire| expire <= now)
}

/// Advance to the next row that has not expired, blocking.
pub(crate) fn next_live_row_sync(
    map: &DictMap,
    rows: &mut Box<dyn SqlRows>,
    now: i64,
) -> Result<bool> {
    while rows.next_row_sync()? {
        if !row_expired(map, rows.as_ref(), now) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Advance to the next row that has not expired.
pub(crate) async fn next_live_row(
    map: &DictMap,
    rows: &mut Box<dyn SqlRows>,
    now: i64,
) -> Result<bool> {
    while rows.next_row().await? {
        if !row_expired(map, rows.as_ref(), now) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Decode the value columns of the current row, skipping the leading expire
/// column when present.
pub(crate) fn decode_values(map: &DictMap, rows: &dyn SqlRows) -> Vec<String> {
    let first_idx = usize::from(map.expire_field.is_some());
    map.value_fields
        .iter()
        .enumerate()
        .map(|(i, field)| field.value_type.decode(&rows.column(first_idx + i)))
        .collect()
}

impl SqlDict {
    /// Look up `key`, blocking until the driver answers.
    ///
    /// Returns `Ok(None)` when no live row matches. A SQL NULL value column
    /// decodes as an empty string.
    pub fn lookup(&self, op: &DictOpSettings, key: &str) -> Result<Option<Vec<String>>> {
        let (map, stmt) = self.lookup_statement(op, key)?;
        let mut rows = self.db().query_sync(stmt)?;
        if next_live_row_sync(map, &mut rows, unix_now())? {
            Ok(Some(decode_values(map, rows.as_ref())))
        } else {
            Ok(None)
        }
    }

    /// Look up `key` through the driver's async entrypoints.
    ///
    /// Unlike the sync variant, a row whose primary value column is SQL NULL
    /// reads as not-found, which is what callers usually want.
    pub async fn lookup_async(&self, op: &DictOpSettings, key: &str) -> Result<Option<Vec<String>>> {
        let (map, stmt) = self.lookup_statement(op, key)?;
        let mut rows = self.db().query(stmt).await?;
        if !next_live_row(map, &mut rows, unix_now()).await? {
            return Ok(None);
        }
        let first_idx = usize::from(map.expire_field.is_some());
        if rows.column(first_idx).is_null() {
            return Ok(None);
        }
        Ok(Some(decode_values(map, rows.as_ref())))
    }

    fn lookup_statement(&self, op: &DictOpSettings, key: &str) -> Result<(&DictMap, SqlStatement)> {
        let (map, values) = find_map(self.settings(), key)?;
        let username = is_private_path(key).then_some(op.username.as_str());
        let (sql, params) = lookup_select(map, &values, username, self.db().table_prefix())?;
        debug!(query = %sql, "dict lookup");
        Ok((map, init_statement(self.db().as_ref(), sql, params)))
    }
}
